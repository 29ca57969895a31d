//! Wire descriptors used on the control channel to rebuild an interface
//! without in-process construction.
//!
//! | Descriptor | Layout |
//! |---|---|
//! | plain | `[u32 len][name UTF-8]` |
//! | service | `[u32 len][name UTF-8][u32 len][service type UTF-8]` |
//!
//! Lengths are big-endian.  Bytes following the last field are ignored, so a
//! service descriptor also decodes as a plain one.

use rce_types::InterfaceError;

const LEN_FIELD: usize = 4;

/// Decoded form of a service descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub service_type: String,
}

pub fn encode_name(name: &str) -> Result<Vec<u8>, InterfaceError> {
    let mut buf = Vec::with_capacity(LEN_FIELD + name.len());
    write_field(&mut buf, name)?;
    Ok(buf)
}

pub fn decode_name(data: &[u8]) -> Result<String, InterfaceError> {
    FieldReader::new(data).read_field()
}

pub fn encode_service(name: &str, service_type: &str) -> Result<Vec<u8>, InterfaceError> {
    let mut buf = Vec::with_capacity(2 * LEN_FIELD + name.len() + service_type.len());
    write_field(&mut buf, name)?;
    write_field(&mut buf, service_type)?;
    Ok(buf)
}

pub fn decode_service(data: &[u8]) -> Result<ServiceDescriptor, InterfaceError> {
    let mut reader = FieldReader::new(data);
    let name = reader.read_field()?;
    let service_type = reader.read_field()?;
    Ok(ServiceDescriptor { name, service_type })
}

fn write_field(buf: &mut Vec<u8>, value: &str) -> Result<(), InterfaceError> {
    let len = u32::try_from(value.len()).map_err(|_| {
        InterfaceError::serialization(format!(
            "Could not serialize Interface: field of {} bytes exceeds the length field",
            value.len()
        ))
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], InterfaceError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len());
        let Some(end) = end else {
            return Err(InterfaceError::serialization(format!(
                "Could not deserialize Interface: need {n} bytes at offset {}, buffer has {}",
                self.pos,
                self.data.len()
            )));
        };
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_field(&mut self) -> Result<String, InterfaceError> {
        let mut len = [0u8; LEN_FIELD];
        len.copy_from_slice(self.take(LEN_FIELD)?);
        let len = u32::from_be_bytes(len) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            InterfaceError::serialization(format!("Could not deserialize Interface: {e}"))
        })
    }
}
