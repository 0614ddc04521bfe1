//! Wire protocol framing
//!
//! Parsing and encoding of the MongoDB wire protocol frames this
//! front-end speaks: `OP_MSG` (kind-0 body plus kind-1 document
//! sequences) for modern clients, `OP_QUERY`/`OP_REPLY` for the legacy
//! handshake path. All integers are little-endian.

use bson::{Bson, Document};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use mondo_core::{MondoError, Result};

/// Largest frame accepted from a client (48 MB, the server default).
pub const MAX_MESSAGE_SIZE: i32 = 48 * 1024 * 1024;

/// `OP_MSG` flag bit: a CRC-32C checksum trails the sections.
pub const FLAG_CHECKSUM_PRESENT: u32 = 1 << 0;
/// `OP_MSG` flag bit: the sender is not expecting a reply.
pub const FLAG_MORE_TO_COME: u32 = 1 << 1;

/// The wire protocol op codes this server understands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OpCode {
    Reply = 1,
    Query = 2004,
    Message = 2013,
}

impl OpCode {
    /// Attempt to infer the op code from its numeric value.
    pub fn from_i32(value: i32) -> Result<Self> {
        match value {
            1 => Ok(OpCode::Reply),
            2004 => Ok(OpCode::Query),
            2013 => Ok(OpCode::Message),
            other => Err(MondoError::BadValue(format!(
                "invalid wire protocol opcode: {}",
                other
            ))),
        }
    }
}

/// The 16-byte header leading every wire message.
#[derive(Debug, Clone, Copy)]
pub struct MessageHeader {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: OpCode,
}

impl MessageHeader {
    pub const LENGTH: usize = 4 * std::mem::size_of::<i32>();

    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let message_length = reader.read_i32_le().await?;
        let request_id = reader.read_i32_le().await?;
        let response_to = reader.read_i32_le().await?;
        let op_code = OpCode::from_i32(reader.read_i32_le().await?)?;
        if message_length < Self::LENGTH as i32 || message_length > MAX_MESSAGE_SIZE {
            return Err(MondoError::BadValue(format!(
                "invalid message length {}",
                message_length
            )));
        }
        Ok(Self {
            message_length,
            request_id,
            response_to,
            op_code,
        })
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.message_length.to_le_bytes()).await?;
        writer.write_all(&self.request_id.to_le_bytes()).await?;
        writer.write_all(&self.response_to.to_le_bytes()).await?;
        writer
            .write_all(&(self.op_code as i32).to_le_bytes())
            .await?;
        Ok(())
    }
}

/// A parsed `OP_MSG`: the kind-0 command document with any kind-1
/// document sequences already folded back into it as array fields.
#[derive(Debug, Clone)]
pub struct OpMsg {
    pub flags: u32,
    pub command: Document,
}

impl OpMsg {
    pub fn expects_reply(&self) -> bool {
        self.flags & FLAG_MORE_TO_COME == 0
    }
}

/// Parse an `OP_MSG` body (everything after the header).
pub fn parse_op_msg(body: &[u8]) -> Result<OpMsg> {
    if body.len() < 5 {
        return Err(MondoError::BadValue("OP_MSG body is truncated".into()));
    }
    let flags = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    let mut sections = &body[4..];
    if flags & FLAG_CHECKSUM_PRESENT != 0 {
        // The trailing CRC is not validated, only excluded from parsing.
        let len = sections.len();
        if len < 4 {
            return Err(MondoError::BadValue("OP_MSG checksum is truncated".into()));
        }
        sections = &sections[..len - 4];
    }

    let mut command: Option<Document> = None;
    let mut sequences: Vec<(String, Vec<Document>)> = Vec::new();

    while !sections.is_empty() {
        let kind = sections[0];
        sections = &sections[1..];
        match kind {
            0 => {
                let (document, rest) = read_document(sections)?;
                if command.is_some() {
                    return Err(MondoError::BadValue(
                        "OP_MSG carries more than one kind-0 section".into(),
                    ));
                }
                command = Some(document);
                sections = rest;
            }
            1 => {
                if sections.len() < 4 {
                    return Err(MondoError::BadValue("OP_MSG section is truncated".into()));
                }
                let size = i32::from_le_bytes([
                    sections[0],
                    sections[1],
                    sections[2],
                    sections[3],
                ]) as usize;
                if size < 4 || size > sections.len() {
                    return Err(MondoError::BadValue(
                        "OP_MSG section size is out of bounds".into(),
                    ));
                }
                let mut payload = &sections[4..size];
                sections = &sections[size..];

                let nul = payload
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or_else(|| {
                        MondoError::BadValue("OP_MSG sequence identifier is unterminated".into())
                    })?;
                let identifier = String::from_utf8_lossy(&payload[..nul]).to_string();
                payload = &payload[nul + 1..];

                let mut documents = Vec::new();
                while !payload.is_empty() {
                    let (document, rest) = read_document(payload)?;
                    documents.push(document);
                    payload = rest;
                }
                sequences.push((identifier, documents));
            }
            other => {
                return Err(MondoError::BadValue(format!(
                    "unknown OP_MSG section kind {}",
                    other
                )));
            }
        }
    }

    let mut command = command
        .ok_or_else(|| MondoError::BadValue("OP_MSG carries no command document".into()))?;
    for (identifier, documents) in sequences {
        command.insert(
            identifier,
            Bson::Array(documents.into_iter().map(Bson::Document).collect()),
        );
    }
    Ok(OpMsg { flags, command })
}

/// Encode a reply document as a kind-0 `OP_MSG` frame.
pub fn encode_op_msg(document: &Document, request_id: i32, response_to: i32) -> Result<Vec<u8>> {
    let payload = bson::to_vec(document)
        .map_err(|e| MondoError::Internal(format!("failed to encode reply: {}", e)))?;
    let message_length = (MessageHeader::LENGTH + 4 + 1 + payload.len()) as i32;

    let mut frame = Vec::with_capacity(message_length as usize);
    frame.extend_from_slice(&message_length.to_le_bytes());
    frame.extend_from_slice(&request_id.to_le_bytes());
    frame.extend_from_slice(&response_to.to_le_bytes());
    frame.extend_from_slice(&(OpCode::Message as i32).to_le_bytes());
    frame.extend_from_slice(&0_u32.to_le_bytes());
    frame.push(0);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// A parsed legacy `OP_QUERY`.
#[derive(Debug, Clone)]
pub struct OpQuery {
    pub full_collection_name: String,
    pub number_to_return: i32,
    pub query: Document,
}

/// Parse an `OP_QUERY` body (everything after the header).
pub fn parse_op_query(body: &[u8]) -> Result<OpQuery> {
    if body.len() < 4 {
        return Err(MondoError::BadValue("OP_QUERY body is truncated".into()));
    }
    let mut rest = &body[4..]; // flags are ignored
    let nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| MondoError::BadValue("OP_QUERY collection name is unterminated".into()))?;
    let full_collection_name = String::from_utf8_lossy(&rest[..nul]).to_string();
    rest = &rest[nul + 1..];
    if rest.len() < 8 {
        return Err(MondoError::BadValue("OP_QUERY body is truncated".into()));
    }
    let number_to_return = i32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]);
    rest = &rest[8..];
    let (query, _) = read_document(rest)?;
    Ok(OpQuery {
        full_collection_name,
        number_to_return,
        query,
    })
}

/// Encode a single-document legacy `OP_REPLY` frame.
pub fn encode_op_reply(document: &Document, request_id: i32, response_to: i32) -> Result<Vec<u8>> {
    let payload = bson::to_vec(document)
        .map_err(|e| MondoError::Internal(format!("failed to encode reply: {}", e)))?;
    // responseFlags + cursorId + startingFrom + numberReturned
    let message_length = (MessageHeader::LENGTH + 4 + 8 + 4 + 4 + payload.len()) as i32;

    let mut frame = Vec::with_capacity(message_length as usize);
    frame.extend_from_slice(&message_length.to_le_bytes());
    frame.extend_from_slice(&request_id.to_le_bytes());
    frame.extend_from_slice(&response_to.to_le_bytes());
    frame.extend_from_slice(&(OpCode::Reply as i32).to_le_bytes());
    frame.extend_from_slice(&0_i32.to_le_bytes()); // responseFlags
    frame.extend_from_slice(&0_i64.to_le_bytes()); // cursorId
    frame.extend_from_slice(&0_i32.to_le_bytes()); // startingFrom
    frame.extend_from_slice(&1_i32.to_le_bytes()); // numberReturned
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read one length-prefixed BSON document, returning it and the
/// remaining bytes.
fn read_document(bytes: &[u8]) -> Result<(Document, &[u8])> {
    if bytes.len() < 4 {
        return Err(MondoError::BadValue("BSON document is truncated".into()));
    }
    let size = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if size < 5 || size > bytes.len() {
        return Err(MondoError::BadValue(format!(
            "BSON document size {} is out of bounds",
            size
        )));
    }
    let document = Document::from_reader(&mut &bytes[..size])
        .map_err(|e| MondoError::BadValue(format!("malformed BSON document: {}", e)))?;
    Ok((document, &bytes[size..]))
}
