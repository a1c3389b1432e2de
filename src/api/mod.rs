//! API Module
//!
//! HTTP admin surface over a `CacheService`.
//!
//! # Endpoints
//! - `PUT /cache`, `DELETE /cache` - Store a value / clear everything
//! - `GET /cache/:key`, `DELETE /cache/:key` - Look up / invalidate a key
//! - `GET /load/:key` - Get or load from the content origin
//! - `POST /access`, `GET /predict/:subject` - Access patterns
//! - `POST /prefetch`, `POST /prefetch/pause`, `POST /prefetch/resume`
//! - `POST /events/focus`, `POST /events/visibility`
//! - `GET /stats`, `GET /health`

pub mod handlers;
pub mod origin;
pub mod routes;

pub use handlers::*;
pub use origin::ContentDirLoader;
pub use routes::create_router;
