pub mod queues;
pub mod store;

pub use queues::{PendingInference, PendingPage, PendingQueues};
pub use store::{PatientStore, PatientView, StoreError};
