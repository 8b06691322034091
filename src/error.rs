//! Error types for the blob file system and the Azure Blob Storage responses it consumes.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Azure Storage error codes a blob client can observe for the operations used here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // General errors
    AuthenticationFailed,
    AuthorizationFailure,
    AuthorizationPermissionMismatch,
    ConditionNotMet,
    InternalError,
    InvalidHeaderValue,
    InvalidInput,
    InvalidQueryParameterValue,
    InvalidResourceName,
    InvalidUri,
    Md5Mismatch,
    OperationTimedOut,
    RequestBodyTooLarge,
    ResourceAlreadyExists,
    ResourceNotFound,
    ServerBusy,

    // Blob-specific errors
    BlobAlreadyExists,
    BlobNotFound,
    ContainerAlreadyExists,
    ContainerBeingDeleted,
    ContainerNotFound,
    LeaseIdMissing,

    /// Any code this client does not know by name.
    Unknown,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthenticationFailed => "AuthenticationFailed",
            ErrorCode::AuthorizationFailure => "AuthorizationFailure",
            ErrorCode::AuthorizationPermissionMismatch => "AuthorizationPermissionMismatch",
            ErrorCode::ConditionNotMet => "ConditionNotMet",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::InvalidHeaderValue => "InvalidHeaderValue",
            ErrorCode::InvalidInput => "InvalidInput",
            ErrorCode::InvalidQueryParameterValue => "InvalidQueryParameterValue",
            ErrorCode::InvalidResourceName => "InvalidResourceName",
            ErrorCode::InvalidUri => "InvalidUri",
            ErrorCode::Md5Mismatch => "Md5Mismatch",
            ErrorCode::OperationTimedOut => "OperationTimedOut",
            ErrorCode::RequestBodyTooLarge => "RequestBodyTooLarge",
            ErrorCode::ResourceAlreadyExists => "ResourceAlreadyExists",
            ErrorCode::ResourceNotFound => "ResourceNotFound",
            ErrorCode::ServerBusy => "ServerBusy",
            ErrorCode::BlobAlreadyExists => "BlobAlreadyExists",
            ErrorCode::BlobNotFound => "BlobNotFound",
            ErrorCode::ContainerAlreadyExists => "ContainerAlreadyExists",
            ErrorCode::ContainerBeingDeleted => "ContainerBeingDeleted",
            ErrorCode::ContainerNotFound => "ContainerNotFound",
            ErrorCode::LeaseIdMissing => "LeaseIdMissing",
            ErrorCode::Unknown => "Unknown",
        }
    }

    /// Parses the value of an `x-ms-error-code` header or `<Code>` element.
    pub fn from_str(s: &str) -> Self {
        match s.trim() {
            "AuthenticationFailed" => ErrorCode::AuthenticationFailed,
            "AuthorizationFailure" => ErrorCode::AuthorizationFailure,
            "AuthorizationPermissionMismatch" => ErrorCode::AuthorizationPermissionMismatch,
            "ConditionNotMet" => ErrorCode::ConditionNotMet,
            "InternalError" => ErrorCode::InternalError,
            "InvalidHeaderValue" => ErrorCode::InvalidHeaderValue,
            "InvalidInput" => ErrorCode::InvalidInput,
            "InvalidQueryParameterValue" => ErrorCode::InvalidQueryParameterValue,
            "InvalidResourceName" => ErrorCode::InvalidResourceName,
            "InvalidUri" => ErrorCode::InvalidUri,
            "Md5Mismatch" => ErrorCode::Md5Mismatch,
            "OperationTimedOut" => ErrorCode::OperationTimedOut,
            "RequestBodyTooLarge" => ErrorCode::RequestBodyTooLarge,
            "ResourceAlreadyExists" => ErrorCode::ResourceAlreadyExists,
            "ResourceNotFound" => ErrorCode::ResourceNotFound,
            "ServerBusy" => ErrorCode::ServerBusy,
            "BlobAlreadyExists" => ErrorCode::BlobAlreadyExists,
            "BlobNotFound" => ErrorCode::BlobNotFound,
            "ContainerAlreadyExists" => ErrorCode::ContainerAlreadyExists,
            "ContainerBeingDeleted" => ErrorCode::ContainerBeingDeleted,
            "ContainerNotFound" => ErrorCode::ContainerNotFound,
            "LeaseIdMissing" => ErrorCode::LeaseIdMissing,
            _ => ErrorCode::Unknown,
        }
    }

    /// Infers a code from the HTTP status when the response carries none.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorCode::AuthenticationFailed,
            403 => ErrorCode::AuthorizationFailure,
            404 => ErrorCode::ResourceNotFound,
            409 => ErrorCode::ResourceAlreadyExists,
            412 => ErrorCode::ConditionNotMet,
            500 => ErrorCode::InternalError,
            503 => ErrorCode::ServerBusy,
            _ => ErrorCode::Unknown,
        }
    }

    /// Returns the default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::AuthenticationFailed => {
                "Server failed to authenticate the request. Make sure the value of the \
                 Authorization header is formed correctly including the signature."
            }
            ErrorCode::AuthorizationFailure => {
                "This request is not authorized to perform this operation."
            }
            ErrorCode::BlobAlreadyExists => "The specified blob already exists.",
            ErrorCode::BlobNotFound => "The specified blob does not exist.",
            ErrorCode::ContainerAlreadyExists => "The specified container already exists.",
            ErrorCode::ContainerNotFound => "The specified container does not exist.",
            ErrorCode::ConditionNotMet => "The condition specified using HTTP conditional header(s) is not met.",
            ErrorCode::ResourceNotFound => "The specified resource does not exist.",
            ErrorCode::ServerBusy => "The server is currently unable to receive requests. Please retry your request.",
            ErrorCode::InternalError => "The server encountered an internal error. Please retry the request.",
            _ => "An error occurred while processing the request.",
        }
    }

    /// Whether the code means the addressed blob is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ErrorCode::BlobNotFound | ErrorCode::ResourceNotFound)
    }

    /// Whether the code means a blob already occupies the target name.
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            ErrorCode::BlobAlreadyExists | ErrorCode::ResourceAlreadyExists | ErrorCode::ConditionNotMet
        )
    }
}

/// Error reported by the storage service.
#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct StorageError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: Option<String>,
}

impl StorageError {
    /// Creates a new storage error with the given code and default message.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.default_message().to_string(),
            code,
            request_id: None,
        }
    }

    /// Creates a new storage error with a custom message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: None,
        }
    }

    /// Sets the request ID for this error.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Builds an error from a failed response.
    ///
    /// The `x-ms-error-code` header wins over the XML body, which wins over the status.
    pub fn from_response(status: u16, error_code: Option<&str>, body: &str) -> Self {
        let (xml_code, xml_message) = parse_error_body(body);
        let code = error_code
            .or(xml_code.as_deref())
            .map(ErrorCode::from_str)
            .filter(|c| *c != ErrorCode::Unknown)
            .unwrap_or_else(|| ErrorCode::from_status(status));

        match xml_message {
            Some(message) => Self::with_message(code, message),
            None => Self::new(code),
        }
    }
}

/// Extracts `Code` and the first line of `Message` from an Azure XML error body.
fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut code = None;
    let mut message = None;
    let mut current: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                current = Some(String::from_utf8_lossy(e.name().as_ref()).to_string());
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Text(e)) => {
                let text = match e.unescape() {
                    Ok(t) => t.to_string(),
                    Err(_) => break,
                };
                match current.as_deref() {
                    Some("Code") => code = Some(text),
                    Some("Message") => {
                        message = text.lines().next().map(|l| l.trim().to_string());
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    (code, message)
}

/// Errors surfaced by the file-system adapter.
#[derive(Debug, Error)]
pub enum FsError {
    /// Missing or invalid configuration; fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed or traversing path supplied by the caller.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// Non-overwriting write onto an occupied key.
    #[error("file already exists: {0}")]
    AlreadyExists(String),

    /// Read or stat of an absent key.
    #[error("file not found: {0}")]
    NotFound(String),

    /// Error reported by the storage service, passed through.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Network-level failure, passed through.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    pub(crate) fn invalid_path(path: &str, reason: &'static str) -> Self {
        FsError::InvalidPath {
            path: path.to_string(),
            reason,
        }
    }

    /// Returns the service error code, if this error came from the service.
    pub fn storage_code(&self) -> Option<ErrorCode> {
        match self {
            FsError::Storage(e) => Some(e.code),
            _ => None,
        }
    }

    /// Whether the service reported the addressed blob as absent.
    pub fn is_blob_not_found(&self) -> bool {
        self.storage_code().map(|c| c.is_not_found()).unwrap_or(false)
    }
}

/// Result type alias for storage client operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for file-system operations.
pub type FsResult<T> = Result<T, FsError>;
