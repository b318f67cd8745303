//! Core module containing fundamental traits and types

pub mod clock;
pub mod entity;
pub mod error;
pub mod headers;
pub mod query;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::Entity;
pub use error::{ApiError, ApiResult};
pub use query::{PagedList, PaginationMeta, QueryParams};
