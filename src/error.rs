//! Command-line Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Configuration,
    #[display("could not open the library database")]
    Database,
    #[display("library operation failed")]
    Library,
    #[display("could not create the library directory")]
    Io,
    #[display("book not found: {_0}")]
    NotFound(#[error(not(source))] i64),
}
