//! Serialisation of DNS messages to the wire format.  See the `types`
//! module for details of the format.
//!
//! The encoder never emits compression pointers: accepting them is
//! required for interoperability, producing them is not.

use crate::protocol::types::*;

impl Message {
    /// # Errors
    ///
    /// If the message is invalid (the `Message` type permits more
    /// states than the wire format does).
    pub fn to_octets(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buffer = ByteWriter::default();
        self.serialise(&mut buffer)?;
        Ok(buffer.octets)
    }

    /// # Errors
    ///
    /// If the message is invalid (the `Message` type permits more
    /// states than the wire format does).
    pub fn serialise(&self, buffer: &mut ByteWriter) -> Result<(), EncodeError> {
        // the header counts come from the sections, not from any
        // stored state
        let wire_header = WireHeader {
            header: self.header,
            qdcount: usize_to_u16(self.questions.len())?,
            ancount: usize_to_u16(self.answers.len())?,
            nscount: usize_to_u16(self.authority.len())?,
            arcount: usize_to_u16(self.additional.len())?,
        };
        wire_header.serialise(buffer);

        for question in &self.questions {
            question.serialise(buffer);
        }
        for rr in &self.answers {
            rr.serialise(buffer)?;
        }
        for rr in &self.authority {
            rr.serialise(buffer)?;
        }
        for rr in &self.additional {
            rr.serialise(buffer)?;
        }

        Ok(())
    }
}

impl WireHeader {
    pub fn serialise(&self, buffer: &mut ByteWriter) {
        let header = self.header;

        // octet 3
        let flag_qr = if header.is_response { HEADER_MASK_QR } else { 0 };
        let field_opcode =
            HEADER_MASK_OPCODE & (u8::from(header.opcode) << HEADER_OFFSET_OPCODE);
        let flag_aa = if header.is_authoritative {
            HEADER_MASK_AA
        } else {
            0
        };
        let flag_tc = if header.is_truncated { HEADER_MASK_TC } else { 0 };
        let flag_rd = if header.recursion_desired {
            HEADER_MASK_RD
        } else {
            0
        };
        // octet 4; the Z bits stay zero
        let flag_ra = if header.recursion_available {
            HEADER_MASK_RA
        } else {
            0
        };
        let field_rcode = HEADER_MASK_RCODE & (u8::from(header.rcode) << HEADER_OFFSET_RCODE);

        buffer.write_u16(header.id);
        buffer.write_u8(flag_qr | field_opcode | flag_aa | flag_tc | flag_rd);
        buffer.write_u8(flag_ra | field_rcode);
        buffer.write_u16(self.qdcount);
        buffer.write_u16(self.ancount);
        buffer.write_u16(self.nscount);
        buffer.write_u16(self.arcount);
    }
}

impl Question {
    pub fn serialise(&self, buffer: &mut ByteWriter) {
        self.name.serialise(buffer);
        buffer.write_u16(self.qtype.into());
        buffer.write_u16(self.qclass.into());
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the RDATA is too long.
    pub fn serialise(&self, buffer: &mut ByteWriter) -> Result<(), EncodeError> {
        self.name.serialise(buffer);
        buffer.write_u16(self.rtype_with_data.rtype().into());
        buffer.write_u16(self.rclass.into());
        buffer.write_u32(self.ttl);

        // filled in below, once the RDATA length is known
        let rdlength_index = buffer.index();
        buffer.write_u16(0);

        self.rtype_with_data.serialise(buffer)?;

        // -2 so we don't also count the rdlength octets themselves
        let rdlength = usize_to_u16(buffer.index() - rdlength_index - 2)?;
        let [hi, lo] = rdlength.to_be_bytes();
        buffer.octets[rdlength_index] = hi;
        buffer.octets[rdlength_index + 1] = lo;

        Ok(())
    }
}

impl RecordTypeWithData {
    /// Serialise just the RDATA octets.
    ///
    /// # Errors
    ///
    /// If a character-string is over 255 octets.
    pub fn serialise(&self, buffer: &mut ByteWriter) -> Result<(), EncodeError> {
        match self {
            RecordTypeWithData::A { address } => buffer.write_octets(&address.octets()),
            RecordTypeWithData::NS { nsdname } => buffer.write_octets(&nsdname.octets),
            RecordTypeWithData::CNAME { cname } => buffer.write_octets(&cname.octets),
            RecordTypeWithData::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                buffer.write_octets(&mname.octets);
                buffer.write_octets(&rname.octets);
                buffer.write_u32(*serial);
                buffer.write_u32(*refresh);
                buffer.write_u32(*retry);
                buffer.write_u32(*expire);
                buffer.write_u32(*minimum);
            }
            RecordTypeWithData::WKS {
                address,
                protocol,
                bitmap,
            } => {
                buffer.write_octets(&address.octets());
                buffer.write_u8(*protocol);
                buffer.write_octets(bitmap);
            }
            RecordTypeWithData::PTR { ptrdname } => buffer.write_octets(&ptrdname.octets),
            RecordTypeWithData::HINFO { cpu, os } => {
                write_character_string(buffer, cpu)?;
                write_character_string(buffer, os)?;
            }
            RecordTypeWithData::MX {
                preference,
                exchange,
            } => {
                buffer.write_u16(*preference);
                buffer.write_octets(&exchange.octets);
            }
            RecordTypeWithData::TXT { strings } => {
                for s in strings {
                    write_character_string(buffer, s)?;
                }
            }
            RecordTypeWithData::AAAA { address } => buffer.write_octets(&address.octets()),
            RecordTypeWithData::Unknown { octets, .. } => buffer.write_octets(octets),
        }

        Ok(())
    }
}

fn write_character_string(buffer: &mut ByteWriter, s: &[u8]) -> Result<(), EncodeError> {
    buffer.write_u8(usize_to_u8(s.len())?);
    buffer.write_octets(s);
    Ok(())
}

impl DomainName {
    pub fn serialise(&self, buffer: &mut ByteWriter) {
        // names are validated at construction, so the stored wire form
        // can be copied straight out
        buffer.write_octets(&self.octets);
    }
}

/// Errors encountered when serialising a message.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EncodeError {
    /// A counter or length does not fit in the field's width.
    CounterTooLarge { counter: usize, bits: u32 },
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            EncodeError::CounterTooLarge { counter, bits } => {
                write!(f, "'{counter}' cannot be converted to a u{bits}")
            }
        }
    }
}

impl std::error::Error for EncodeError {}

/// A buffer which can be written to, for serialisation purposes.
pub struct ByteWriter {
    pub octets: Vec<u8>,
}

impl Default for ByteWriter {
    fn default() -> Self {
        Self {
            octets: Vec::with_capacity(512),
        }
    }
}

impl ByteWriter {
    pub fn index(&self) -> usize {
        self.octets.len()
    }

    pub fn write_u8(&mut self, octet: u8) {
        self.octets.push(octet);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.octets.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.octets.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_octets(&mut self, octets: &[u8]) {
        self.octets.extend_from_slice(octets);
    }
}

fn usize_to_u16(counter: usize) -> Result<u16, EncodeError> {
    u16::try_from(counter).map_err(|_| EncodeError::CounterTooLarge {
        counter,
        bits: u16::BITS,
    })
}

fn usize_to_u8(counter: usize) -> Result<u8, EncodeError> {
    u8::try_from(counter).map_err(|_| EncodeError::CounterTooLarge {
        counter,
        bits: u8::BITS,
    })
}
