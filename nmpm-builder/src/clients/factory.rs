//! Construction of the client set a build run uses

use std::sync::Arc;

use super::{
    BandcampClient, CatalogError, MetalArchivesClient, ReleaseSource, SpotifyClient, Storefront,
    StorefrontError, StreamingCatalog, StreamingError,
};

/// Hands out clients per run
///
/// The streaming client is bound to the owner's token, so it is built per run;
/// the other two are shared and keep their rate limiters across runs.
pub trait ClientFactory: Send + Sync {
    fn release_source(&self) -> Arc<dyn ReleaseSource>;

    fn storefront(&self) -> Arc<dyn Storefront>;

    fn streaming(&self, access_token: &str) -> Result<Arc<dyn StreamingCatalog>, StreamingError>;
}

/// Production clients against the real services
pub struct HttpClientFactory {
    release_source: Arc<MetalArchivesClient>,
    storefront: Arc<BandcampClient>,
    spotify_api_base: String,
}

/// Client construction failures at startup
#[derive(Debug, thiserror::Error)]
pub enum ClientSetupError {
    #[error("Release catalog client: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Storefront client: {0}")]
    Storefront(#[from] StorefrontError),
}

impl HttpClientFactory {
    pub fn new(spotify_api_base: &str) -> Result<Self, ClientSetupError> {
        Ok(Self {
            release_source: Arc::new(MetalArchivesClient::new()?),
            storefront: Arc::new(BandcampClient::new()?),
            spotify_api_base: spotify_api_base.to_string(),
        })
    }
}

impl ClientFactory for HttpClientFactory {
    fn release_source(&self) -> Arc<dyn ReleaseSource> {
        self.release_source.clone()
    }

    fn storefront(&self) -> Arc<dyn Storefront> {
        self.storefront.clone()
    }

    fn streaming(&self, access_token: &str) -> Result<Arc<dyn StreamingCatalog>, StreamingError> {
        let client = SpotifyClient::with_base_url(access_token.to_string(), &self.spotify_api_base)?;
        Ok(Arc::new(client))
    }
}
