//! Top-level error type composing every subsystem's error.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DwsError>;

#[derive(Error, Debug)]
pub enum DwsError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("fatal initialization error: {0}")]
    Initialization(String),

    #[error(transparent)]
    PeerStore(#[from] dws_peer_store::PeerStoreError),

    #[error(transparent)]
    P2p(#[from] dws_p2p::P2pError),

    #[error(transparent)]
    Autoscaler(#[from] dws_autoscaler::AutoscalerError),

    #[error(transparent)]
    Mesh(#[from] dws_mesh::MeshError),

    #[error(transparent)]
    Ingress(#[from] dws_ingress::IngressError),

    #[error(transparent)]
    Poc(#[from] dws_poc::PocError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
