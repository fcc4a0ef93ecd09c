//! Engine services: acquisition, rendering, theming, and the live-update
//! controller that drives them.

pub mod error;
pub mod fetch;
pub mod host;
pub mod live;
pub mod render;
pub mod theme;
pub mod toc;
