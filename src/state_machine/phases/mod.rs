mod awaiting;
mod completed;
mod fetch_architecture;
mod fetch_weights;
mod init;
mod join;
mod publish;
mod train;
mod upload;

pub use self::{
    awaiting::Awaiting,
    completed::Completed,
    fetch_architecture::FetchArchitecture,
    fetch_weights::FetchWeights,
    init::Init,
    join::Join,
    publish::Publish,
    train::Train,
    upload::Upload,
};
