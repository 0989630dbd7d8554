//! Core library for a tile-map proxy and reprojection server: cache,
//! fetcher, projection math, and image compositor. The HTTP front-end
//! lives in the `twms-server` binary crate.

pub mod bbox;
pub mod cache;
pub mod codec;
#[cfg(feature = "http")]
pub mod compositor;
#[cfg(feature = "http")]
pub mod engine;
pub mod error;
#[cfg(feature = "http")]
pub mod fetcher;
#[cfg(feature = "http")]
pub mod http_session;
pub mod layer;
pub mod projection;
pub mod tile;

pub use bbox::Bbox;
#[cfg(feature = "http")]
pub use compositor::{Compositor, ForceFlags, RenderedImage};
#[cfg(feature = "http")]
pub use engine::TileEngine;
pub use error::{TwmsError, TwmsResult};
#[cfg(feature = "http")]
pub use fetcher::Fetcher;
#[cfg(feature = "http")]
pub use http_session::HttpSession;
pub use layer::{Layer, LayerConfig, Mimetype, ServerDefaults};
pub use projection::Projection;
pub use tile::TileKey;
