//! CTAP2 status codes
//!
//! Every response starts with one of these bytes. `0x00` is success; the
//! rest name the reason a command was rejected. Transport-level CTAPHID
//! errors (channel busy, invalid sequence, ...) are raised by the transport
//! and do not appear here.

use core::fmt;

use openfido_crypto::CryptoError;

macro_rules! status_codes {
    ($($(#[$doc:meta])* $name:ident = $value:literal => $text:literal,)*) => {
        /// CTAP2 status codes
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum StatusCode {
            $($(#[$doc])* $name = $value,)*
        }

        impl StatusCode {
            /// Decode a status byte; unknown values collapse to [`StatusCode::Other`]
            pub fn from_u8(value: u8) -> Self {
                match value {
                    $($value => Self::$name,)*
                    _ => Self::Other,
                }
            }

            fn text(self) -> &'static str {
                match self {
                    $(Self::$name => $text,)*
                }
            }
        }
    };
}

status_codes! {
    /// Command completed
    Success = 0x00 => "Success",
    /// Unknown command byte
    InvalidCommand = 0x01 => "Invalid command",
    /// A parameter had the wrong value
    InvalidParameter = 0x02 => "Invalid parameter",
    /// A message or item had the wrong length
    InvalidLength = 0x03 => "Invalid length",
    /// CBOR item had an unexpected major type
    CborUnexpectedType = 0x11 => "CBOR unexpected type",
    /// Malformed CBOR
    InvalidCbor = 0x12 => "Invalid CBOR",
    /// A required parameter is missing
    MissingParameter = 0x14 => "Missing parameter",
    /// A limit (list length, nesting) was exceeded
    LimitExceeded = 0x15 => "Limit exceeded",
    /// An excludeList credential already lives on this authenticator
    CredentialExcluded = 0x19 => "Credential excluded",
    /// Internal failure while processing
    Processing = 0x21 => "Processing",
    /// Credential is not valid for this request
    InvalidCredential = 0x22 => "Invalid credential",
    /// None of the requested algorithms is supported
    UnsupportedAlgorithm = 0x26 => "Unsupported algorithm",
    /// User declined the operation
    OperationDenied = 0x27 => "Operation denied",
    /// Credential store has no free slot
    KeyStoreFull = 0x28 => "Key store full",
    /// Continuation command without a preceding operation
    NoOperationPending = 0x2A => "No operation pending",
    /// Option not supported
    UnsupportedOption = 0x2B => "Unsupported option",
    /// Option value not valid for this command
    InvalidOption = 0x2C => "Invalid option",
    /// No matching credential
    NoCredentials = 0x2E => "No credentials",
    /// User presence was not confirmed in time
    UserActionTimeout = 0x2F => "User action timeout",
    /// Operation not allowed in the current state
    NotAllowed = 0x30 => "Not allowed",
    /// Wrong PIN
    PinInvalid = 0x31 => "PIN invalid",
    /// PIN retries exhausted until reset
    PinBlocked = 0x32 => "PIN blocked",
    /// pinUvAuthParam did not verify
    PinAuthInvalid = 0x33 => "PIN auth invalid",
    /// Too many consecutive mismatches in this power cycle
    PinAuthBlocked = 0x34 => "PIN auth blocked",
    /// No PIN configured
    PinNotSet = 0x35 => "PIN not set",
    /// Command needs a PIN token
    PinRequired = 0x36 => "PIN required",
    /// PIN does not meet the length policy
    PinPolicyViolation = 0x37 => "PIN policy violation",
    /// Request exceeds a storage or message bound
    RequestTooLarge = 0x39 => "Request too large",
    /// Large blob integrity check failed
    IntegrityFailure = 0x3D => "Integrity failure",
    /// Unknown subcommand
    InvalidSubcommand = 0x3E => "Invalid subcommand",
    /// Token lacks the permission required for the command
    UnauthorizedPermission = 0x40 => "Unauthorized permission",
    /// Unspecified error
    Other = 0x7F => "Other error",
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for StatusCode {}

impl StatusCode {
    /// Byte value placed in front of the response body
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl From<StatusCode> for u8 {
    fn from(status: StatusCode) -> u8 {
        status.to_u8()
    }
}

impl From<CryptoError> for StatusCode {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidPublicKey => Self::InvalidParameter,
            _ => Self::Processing,
        }
    }
}

/// Result type for CTAP operations
pub type Result<T> = core::result::Result<T, StatusCode>;
