pub mod craigslist;
pub mod streeteasy;
pub mod traits;
pub mod types;
pub mod zillow;

pub use craigslist::CraigslistAdapter;
pub use streeteasy::StreeteasyAdapter;
pub use traits::{ScrapeError, SiteAdapter};
pub use types::{ScrapeItem, ScraperSettings, SearchConfig};
pub use zillow::ZillowAdapter;

use crate::models::Site;

/// Adapter lookup for a configured site.
pub fn adapter_for(site: Site, settings: ScraperSettings) -> Box<dyn SiteAdapter> {
    match site {
        Site::Craigslist => Box::new(CraigslistAdapter::new(settings)),
        Site::Streeteasy => Box::new(StreeteasyAdapter::new(settings)),
        Site::Zillow => Box::new(ZillowAdapter::new(settings)),
    }
}
