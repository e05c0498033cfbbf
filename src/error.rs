use crate::domain::order::OrderStatus;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification used by transport layers to pick a response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Unauthorized,
    InternalServerError,
}

impl ErrorKind {
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::InternalServerError => 500,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("Order already in {0} status")]
    SameStatus(OrderStatus),
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("Cannot modify a finalized order")]
    FinalizedOrder,
    #[error("Resource busy, try again")]
    Busy { key: String },
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("Failed to acquire lock")]
    Lock(#[source] BoxError),
    #[error("{context}")]
    Storage {
        context: String,
        #[source]
        source: BoxError,
    },
    #[error("Payment gateway error: {context}")]
    Gateway {
        context: String,
        #[source]
        source: BoxError,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn storage(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Storage {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn gateway(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Gateway {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_)
            | AppError::SameStatus(_)
            | AppError::InvalidTransition { .. }
            | AppError::FinalizedOrder
            | AppError::Busy { .. } => ErrorKind::BadRequest,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Unauthorized(_) => ErrorKind::Unauthorized,
            AppError::Lock(_)
            | AppError::Storage { .. }
            | AppError::Gateway { .. }
            | AppError::Io(_)
            | AppError::Serialization(_) => ErrorKind::InternalServerError,
            #[cfg(feature = "storage-rocksdb")]
            AppError::RocksDb(_) => ErrorKind::InternalServerError,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, AppError::Busy { .. })
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
