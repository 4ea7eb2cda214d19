use domain::ProviderError;
use thiserror::Error;

use crate::bridge::BridgeError;
use crate::dispatch::DispatchError;
use crate::supervisor::SupervisorError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),
    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),
    #[error("provider error: {0}")]
    Provider(ProviderError),
}

impl ApplicationError {
    /// 平台是否给出了永久拒绝，调用方不应原样重试
    pub fn is_permanent_delivery_failure(&self) -> bool {
        matches!(
            self,
            ApplicationError::Dispatch(DispatchError::Delivery(_)) | ApplicationError::Provider(_)
        )
    }
}

impl From<ProviderError> for ApplicationError {
    fn from(value: ProviderError) -> Self {
        ApplicationError::Provider(value)
    }
}
