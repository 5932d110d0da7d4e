#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use planar_image as image;

#[doc(inline)]
pub use planar_imgproc as imgproc;

#[doc(inline)]
pub use planar_geometry as geometry;

#[doc(inline)]
pub use planar_optim as optim;

/// Estimation and stitching with injected matching and plotting collaborators.
pub mod pipeline;
