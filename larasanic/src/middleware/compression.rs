//! Gzip response compression.

use tower_http::compression::{
    CompressionLayer, CompressionLevel, Predicate,
    predicate::{NotForContentType, SizeAbove},
};

use crate::config::CompressionConfig;

/// Gzip layer that skips small bodies and already compressed or streaming content types.
pub fn compression_layer(config: &CompressionConfig) -> CompressionLayer<impl Predicate + Clone + use<>> {
    let predicate = SizeAbove::new(config.min_size)
        .and(NotForContentType::IMAGES)
        .and(NotForContentType::GRPC)
        .and(NotForContentType::SSE)
        .and(NotForContentType::const_new("audio/"))
        .and(NotForContentType::const_new("video/"))
        .and(NotForContentType::const_new("application/zip"))
        .and(NotForContentType::const_new("application/gzip"))
        .and(NotForContentType::const_new("application/octet-stream"));

    CompressionLayer::new()
        .quality(CompressionLevel::Precise(config.level.clamp(1, 9) as i32))
        .compress_when(predicate)
}
