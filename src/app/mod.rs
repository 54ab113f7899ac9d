pub mod coordinator;
pub mod payment_use_case;
pub mod ports;
pub mod train_use_case;

pub use coordinator::{Failure, Invocation, Stage};
pub use payment_use_case::{PaymentReceipt, PaymentSettings, PaymentUseCase};
pub use train_use_case::{TrainReceipt, TrainSettings, TrainUseCase};
