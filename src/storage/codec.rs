//! Record encoding for the binary format
//!
//! A record is the request followed by the response. Strings and byte
//! strings are prefixed with a little-endian `u32` length; optional bodies
//! carry a one-byte presence flag.

use crate::interaction::{HeaderMap, Interaction, Request, Response};
use crate::{Result, TapedeckError};

/// Encode an interaction's request and response
#[must_use]
pub fn encode_record(interaction: &Interaction) -> Vec<u8> {
    let request = interaction.request();
    let response = interaction.response();
    let mut data = Vec::new();

    // Request
    put_bytes(&mut data, request.method.as_bytes());
    put_bytes(&mut data, request.url.as_bytes());
    put_headers(&mut data, &request.headers);
    put_body(&mut data, request.body.as_deref());

    // Response
    data.extend_from_slice(&response.status.to_le_bytes());
    put_headers(&mut data, &response.headers);
    put_body(&mut data, response.body.as_deref());

    data
}

/// Decode a record produced by [`encode_record`]
///
/// # Errors
///
/// Returns error if the record is truncated, has trailing bytes or holds
/// non-UTF-8 text where a string is expected
pub fn decode_record(data: &[u8], recorded_at: Option<u64>) -> Result<Interaction> {
    let mut cursor = Cursor { data, offset: 0 };

    let request = Request {
        method: cursor.string("method")?,
        url: cursor.string("url")?,
        headers: cursor.headers()?,
        body: cursor.body()?,
    };

    let status = u16::from_le_bytes(cursor.array::<2>("status")?);
    let response = Response {
        status,
        headers: cursor.headers()?,
        body: cursor.body()?,
    };

    if cursor.offset != data.len() {
        return Err(TapedeckError::InvalidFormat(format!(
            "Record has {} trailing bytes",
            data.len() - cursor.offset
        )));
    }

    Ok(Interaction::new(request, response, recorded_at))
}

fn put_bytes(data: &mut Vec<u8>, bytes: &[u8]) {
    data.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    data.extend_from_slice(bytes);
}

fn put_headers(data: &mut Vec<u8>, headers: &HeaderMap) {
    data.extend_from_slice(&(headers.len() as u32).to_le_bytes());
    for (name, value) in headers {
        put_bytes(data, name.as_bytes());
        put_bytes(data, value.as_bytes());
    }
}

fn put_body(data: &mut Vec<u8>, body: Option<&[u8]>) {
    match body {
        Some(body) => {
            data.push(1);
            put_bytes(data, body);
        }
        None => data.push(0),
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                TapedeckError::InvalidFormat(format!("Record truncated while reading {what}"))
            })?;

        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn bytes(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = u32::from_le_bytes(self.array::<4>(what)?) as usize;
        self.take(len, what)
    }

    fn string(&mut self, what: &str) -> Result<String> {
        let bytes = self.bytes(what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| TapedeckError::InvalidFormat(format!("{what} is not valid UTF-8")))
    }

    fn headers(&mut self) -> Result<HeaderMap> {
        let count = u32::from_le_bytes(self.array::<4>("header count")?);
        let mut headers = HeaderMap::new();
        for _ in 0..count {
            let name = self.string("header name")?;
            let value = self.string("header value")?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn body(&mut self) -> Result<Option<Vec<u8>>> {
        match self.array::<1>("body flag")?[0] {
            0 => Ok(None),
            1 => Ok(Some(self.bytes("body")?.to_vec())),
            flag => Err(TapedeckError::InvalidFormat(format!(
                "Invalid body flag: {flag}"
            ))),
        }
    }
}
