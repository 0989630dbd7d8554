use thiserror::Error;

/// Crate-wide result alias.
pub type TwmsResult<T> = Result<T, TwmsError>;

/// Errors surfaced across the tile engine.
///
/// Per-tile problems (missing upstream tile, malformed cached image, an
/// out-of-bounds coordinate) are *not* represented here, the engine
/// degrades those to "no tile" internally (see spec §7) and never raises.
/// This enum only covers failures that must propagate to a caller: bad
/// configuration, unsupported formats, and I/O failures the cache itself
/// cannot route around.
#[derive(Debug, Error)]
pub enum TwmsError {
    #[error("unknown layer {0:?}")]
    UnknownLayer(String),

    #[error("unsupported projection {0:?}")]
    UnsupportedProjection(String),

    #[error("unsupported mimetype {0:?}")]
    UnsupportedMimetype(String),

    #[error("invalid bbox: {0}")]
    InvalidBbox(String),

    #[error("invalid tile coordinate z={z} x={x} y={y}")]
    InvalidTileCoordinate { z: i64, x: i64, y: i64 },

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "http")]
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Decode(#[from] image::ImageError),
}
