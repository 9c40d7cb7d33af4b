//! Protocol-agnostic query API over a storage adapter
//!
//! An [`ApiRequest`] (method, path, query pairs, headers, optional JSON body) is
//! routed to a storage call and mapped to an [`ApiResponse`] with a status and a
//! JSON body. Storage failures never escape: they become a 500 response carrying
//! the underlying message.
//!
//! Routes (after the mount prefix, `/api` by default, is stripped):
//!
//! | Method | Path                 | Result                    |
//! |--------|----------------------|---------------------------|
//! | GET    | `/entries`           | paginated, filtered list  |
//! | GET    | `/entries/{id}`      | one entry or 404          |
//! | DELETE | `/entries`           | clear everything          |
//! | GET    | `/batches/{batchId}` | batch, oldest first       |
//! | GET    | `/stats`             | storage statistics        |
//! | POST   | `/prune`             | prune older than `hours`  |

mod handler;
mod params;
mod request;

pub use handler::{ApiHandler, DEFAULT_PREFIX};
pub use params::{MAX_LIMIT, parse_list_options};
pub use request::{ApiRequest, ApiResponse};
