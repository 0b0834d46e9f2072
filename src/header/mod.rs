//! Frame headers distinguishing requests from responses.
//!
//! A header is parsed from the front of every inbound message before anything
//! else is looked at. The responder, never the requester, negotiates the
//! protocol version of an exchange by answering with the lower of its own
//! version and the one carried by the request.

use crate::{
    error::{ChannelError, FramingError},
    message::{MessageReader, MessageWriter},
    protocol::{
        BATCH_ID,
        OPERATION_ID,
        REQUEST_ID,
        RESPONSE_BODY,
        RESPONSE_ERROR,
        RESPONSE_ID,
        RESPONSE_TYPE,
        SIGNATURE,
        TYPE,
        TYPE_REQUEST,
        TYPE_RESPONSE,
        VERSION_FIELD,
    },
};

/// Header of a request frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestHeader {
    version: u32,
    request_id: u32,
    batch_id: u32,
    operation_id: u8,
}

impl RequestHeader {
    /// Create a request header.
    #[must_use]
    pub fn new(version: u32, request_id: u32, batch_id: u32, operation_id: u8) -> Self {
        Self {
            version,
            request_id,
            batch_id,
            operation_id,
        }
    }

    /// Protocol version spoken by the requester.
    #[must_use]
    pub fn version(&self) -> u32 { self.version }

    /// Correlation id echoed by the response.
    #[must_use]
    pub fn request_id(&self) -> u32 { self.request_id }

    /// Batch the request belongs to.
    #[must_use]
    pub fn batch_id(&self) -> u32 { self.batch_id }

    /// Operation the request targets.
    #[must_use]
    pub fn operation_id(&self) -> u8 { self.operation_id }

    /// Serialize the header, including the common prefix.
    pub fn write(&self, output: &mut MessageWriter) {
        write_prefix(output, self.version, TYPE_REQUEST);
        output.write_u8(REQUEST_ID);
        output.write_u32(self.request_id);
        output.write_u8(BATCH_ID);
        output.write_u32(self.batch_id);
        output.write_u8(OPERATION_ID);
        output.write_u8(self.operation_id);
    }

    fn read_fields(version: u32, input: &mut MessageReader) -> Result<Self, FramingError> {
        input.expect_tag(REQUEST_ID)?;
        let request_id = input.read_u32()?;
        input.expect_tag(BATCH_ID)?;
        let batch_id = input.read_u32()?;
        input.expect_tag(OPERATION_ID)?;
        let operation_id = input.read_u8()?;
        Ok(Self::new(version, request_id, batch_id, operation_id))
    }
}

/// Header of a response frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseHeader {
    version: u32,
    response_id: u32,
    error: Option<String>,
}

impl ResponseHeader {
    /// Create a response header.
    #[must_use]
    pub fn new(version: u32, response_id: u32, error: Option<String>) -> Self {
        Self {
            version,
            response_id,
            error,
        }
    }

    /// Build the header answering `request`.
    ///
    /// The version is `min(local_version, request.version())`. Only the
    /// display string of `error` is kept.
    #[must_use]
    pub fn for_request(
        request: &RequestHeader,
        local_version: u32,
        error: Option<&ChannelError>,
    ) -> Self {
        Self::new(
            local_version.min(request.version()),
            request.request_id(),
            error.map(ToString::to_string),
        )
    }

    /// Negotiated protocol version.
    #[must_use]
    pub fn version(&self) -> u32 { self.version }

    /// Id of the request being answered.
    #[must_use]
    pub fn response_id(&self) -> u32 { self.response_id }

    /// Error reported by the responder, if the request failed.
    #[must_use]
    pub fn error(&self) -> Option<&str> { self.error.as_deref() }

    /// Returns true if the response carries no error.
    #[must_use]
    pub fn is_success(&self) -> bool { self.error.is_none() }

    /// Serialize the header, including the common prefix.
    pub fn write(&self, output: &mut MessageWriter) {
        write_prefix(output, self.version, TYPE_RESPONSE);
        output.write_u8(RESPONSE_ID);
        output.write_u32(self.response_id);
        output.write_u8(RESPONSE_TYPE);
        match &self.error {
            None => output.write_u8(RESPONSE_BODY),
            Some(message) => {
                output.write_u8(RESPONSE_ERROR);
                output.write_string(message);
            }
        }
    }

    fn read_fields(version: u32, input: &mut MessageReader) -> Result<Self, FramingError> {
        input.expect_tag(RESPONSE_ID)?;
        let response_id = input.read_u32()?;
        input.expect_tag(RESPONSE_TYPE)?;
        let error = match input.read_u8()? {
            RESPONSE_BODY => None,
            RESPONSE_ERROR => Some(input.read_string()?),
            other => return Err(FramingError::UnknownResponseType(other)),
        };
        Ok(Self::new(version, response_id, error))
    }
}

/// Header of any frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolHeader {
    /// The frame carries a request.
    Request(RequestHeader),
    /// The frame carries a response.
    Response(ResponseHeader),
}

impl ProtocolHeader {
    /// Parse the header at the front of `input`.
    ///
    /// On success `input` is positioned at the first payload byte.
    ///
    /// # Errors
    ///
    /// Returns a [`FramingError`] if the signature, a field tag or the frame
    /// type is wrong, or if the message ends inside the header.
    pub fn parse(input: &mut MessageReader) -> Result<Self, FramingError> {
        let signature = input.read_bytes(SIGNATURE.len())?;
        if signature[..] != SIGNATURE {
            return Err(FramingError::BadSignature);
        }
        input.expect_tag(VERSION_FIELD)?;
        let version = input.read_u32()?;
        input.expect_tag(TYPE)?;
        match input.read_u8()? {
            TYPE_REQUEST => RequestHeader::read_fields(version, input).map(Self::Request),
            TYPE_RESPONSE => ResponseHeader::read_fields(version, input).map(Self::Response),
            other => Err(FramingError::UnknownFrameType(other)),
        }
    }

    /// Serialize the header.
    pub fn write(&self, output: &mut MessageWriter) {
        match self {
            Self::Request(header) => header.write(output),
            Self::Response(header) => header.write(output),
        }
    }

    /// Protocol version carried by the header.
    #[must_use]
    pub fn version(&self) -> u32 {
        match self {
            Self::Request(header) => header.version(),
            Self::Response(header) => header.version(),
        }
    }

    /// Returns true for request headers.
    #[must_use]
    pub fn is_request(&self) -> bool { matches!(self, Self::Request(_)) }
}

impl From<RequestHeader> for ProtocolHeader {
    fn from(header: RequestHeader) -> Self { Self::Request(header) }
}

impl From<ResponseHeader> for ProtocolHeader {
    fn from(header: ResponseHeader) -> Self { Self::Response(header) }
}

fn write_prefix(output: &mut MessageWriter, version: u32, frame_type: u8) {
    output.write_bytes(&SIGNATURE);
    output.write_u8(VERSION_FIELD);
    output.write_u32(version);
    output.write_u8(TYPE);
    output.write_u8(frame_type);
}

#[cfg(test)]
mod tests;
