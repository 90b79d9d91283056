use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("could not open the catalog")]
    Catalog,
    #[display("could not connect to the object store")]
    Storage,
    #[display("connecting took longer than {_0} seconds")]
    ConnectTimeout(#[error(not(source))] u64),
    #[display("reconciliation failed")]
    Reconcile,
}
