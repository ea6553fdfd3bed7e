pub mod platform;
pub mod remote;
pub mod repository;
pub mod rows;
pub mod sample;
pub mod study;

pub use platform::Platform;
pub use remote::RemoteFile;
pub use repository::Repository;
pub use rows::RowStream;
pub use sample::Sample;
pub use study::{Population, Study};
