//! Deserialisation of DNS messages from the network.  See the `types`
//! module for details of the format.
//!
//! Error mapping is deliberately coarse: the buffer running out inside
//! a field is `Truncated`, which also covers a record whose RDLENGTH
//! disagrees with the octets its RDATA actually consumes.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::protocol::types::*;

/// How many label and pointer hops a single name may take before the
/// decoder gives up.  Compression pointers must always point earlier
/// in the message, but a hostile message can still interleave labels
/// and pointers to make the decoder do a lot of work: this cap bounds
/// it.
pub const POINTER_HOP_LIMIT: usize = 128;

impl Message {
    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn from_octets(octets: &[u8]) -> Result<Self, DecodeError> {
        Self::deserialise(&mut ByteReader::new(octets))
    }

    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn deserialise(buffer: &mut ByteReader) -> Result<Self, DecodeError> {
        let wire_header = WireHeader::deserialise(buffer)?;
        let id = wire_header.header.id;
        let mut questions = Vec::with_capacity(wire_header.qdcount.into());
        let mut answers = Vec::with_capacity(wire_header.ancount.into());
        let mut authority = Vec::with_capacity(wire_header.nscount.into());
        let mut additional = Vec::with_capacity(wire_header.arcount.into());

        for _ in 0..wire_header.qdcount {
            check_section_boundary(id, buffer)?;
            questions.push(Question::deserialise(id, buffer)?);
        }
        for _ in 0..wire_header.ancount {
            check_section_boundary(id, buffer)?;
            answers.push(ResourceRecord::deserialise(id, buffer)?);
        }
        for _ in 0..wire_header.nscount {
            check_section_boundary(id, buffer)?;
            authority.push(ResourceRecord::deserialise(id, buffer)?);
        }
        for _ in 0..wire_header.arcount {
            check_section_boundary(id, buffer)?;
            additional.push(ResourceRecord::deserialise(id, buffer)?);
        }

        Ok(Self {
            header: wire_header.header,
            questions,
            answers,
            authority,
            additional,
        })
    }
}

/// A header count which claims more records than the buffer supplies
/// is a `SectionCountMismatch`, not a truncation: the message ends
/// cleanly, just earlier than its own header said it would.
fn check_section_boundary(id: u16, buffer: &ByteReader) -> Result<(), DecodeError> {
    if buffer.is_empty() {
        Err(DecodeError::SectionCountMismatch { id: Some(id) })
    } else {
        Ok(())
    }
}

impl WireHeader {
    /// # Errors
    ///
    /// If the header is too short.
    pub fn deserialise(buffer: &mut ByteReader) -> Result<Self, DecodeError> {
        let id = buffer
            .next_u16()
            .ok_or(DecodeError::Truncated { id: None })?;
        let err = DecodeError::Truncated { id: Some(id) };
        let flags1 = buffer.next_u8().ok_or(err)?;
        let flags2 = buffer.next_u8().ok_or(err)?;
        let qdcount = buffer.next_u16().ok_or(err)?;
        let ancount = buffer.next_u16().ok_or(err)?;
        let nscount = buffer.next_u16().ok_or(err)?;
        let arcount = buffer.next_u16().ok_or(err)?;

        Ok(Self {
            header: Header {
                id,
                is_response: flags1 & HEADER_MASK_QR != 0,
                opcode: Opcode::from((flags1 & HEADER_MASK_OPCODE) >> HEADER_OFFSET_OPCODE),
                is_authoritative: flags1 & HEADER_MASK_AA != 0,
                is_truncated: flags1 & HEADER_MASK_TC != 0,
                recursion_desired: flags1 & HEADER_MASK_RD != 0,
                recursion_available: flags2 & HEADER_MASK_RA != 0,
                rcode: Rcode::from((flags2 & HEADER_MASK_RCODE) >> HEADER_OFFSET_RCODE),
            },
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }
}

impl Question {
    /// # Errors
    ///
    /// If the question cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ByteReader) -> Result<Self, DecodeError> {
        let name = DomainName::deserialise(id, buffer)?;
        let qtype = buffer
            .next_u16()
            .ok_or(DecodeError::Truncated { id: Some(id) })?
            .into();
        let qclass = buffer
            .next_u16()
            .ok_or(DecodeError::Truncated { id: Some(id) })?
            .into();

        Ok(Self {
            name,
            qtype,
            qclass,
        })
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the record cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ByteReader) -> Result<Self, DecodeError> {
        let err = DecodeError::Truncated { id: Some(id) };

        let name = DomainName::deserialise(id, buffer)?;
        let rtype = RecordType::from(buffer.next_u16().ok_or(err)?);
        let rclass = RecordClass::from(buffer.next_u16().ok_or(err)?);
        let ttl = buffer.next_u32().ok_or(err)?;
        let rdlength = buffer.next_u16().ok_or(err)?;

        let rdata_start = buffer.position();
        let rtype_with_data =
            RecordTypeWithData::deserialise(id, rtype, rdlength, buffer)?;

        // embedded names may be compressed, so the typed parse is the
        // only way to know how many octets the RDATA really took
        if buffer.position() == rdata_start + rdlength as usize {
            Ok(Self {
                name,
                rtype_with_data,
                rclass,
                ttl,
            })
        } else {
            Err(err)
        }
    }
}

impl RecordTypeWithData {
    /// Parse the RDATA of a record inside a full message: embedded
    /// domain names are resolved against the whole buffer, so they may
    /// use compression pointers.
    ///
    /// # Errors
    ///
    /// If the RDATA cannot be parsed.
    pub fn deserialise(
        id: u16,
        rtype: RecordType,
        rdlength: u16,
        buffer: &mut ByteReader,
    ) -> Result<Self, DecodeError> {
        let err = DecodeError::Truncated { id: Some(id) };

        let rtype_with_data = match rtype {
            RecordType::A => RecordTypeWithData::A {
                address: Ipv4Addr::from(buffer.next_u32().ok_or(err)?),
            },
            RecordType::NS => RecordTypeWithData::NS {
                nsdname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::CNAME => RecordTypeWithData::CNAME {
                cname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::SOA => RecordTypeWithData::SOA {
                mname: DomainName::deserialise(id, buffer)?,
                rname: DomainName::deserialise(id, buffer)?,
                serial: buffer.next_u32().ok_or(err)?,
                refresh: buffer.next_u32().ok_or(err)?,
                retry: buffer.next_u32().ok_or(err)?,
                expire: buffer.next_u32().ok_or(err)?,
                minimum: buffer.next_u32().ok_or(err)?,
            },
            RecordType::WKS => {
                if rdlength < 5 {
                    return Err(err);
                }
                RecordTypeWithData::WKS {
                    address: Ipv4Addr::from(buffer.next_u32().ok_or(err)?),
                    protocol: buffer.next_u8().ok_or(err)?,
                    bitmap: buffer.take(rdlength as usize - 5).ok_or(err)?.to_vec(),
                }
            }
            RecordType::PTR => RecordTypeWithData::PTR {
                ptrdname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::HINFO => RecordTypeWithData::HINFO {
                cpu: character_string(id, buffer)?,
                os: character_string(id, buffer)?,
            },
            RecordType::MX => RecordTypeWithData::MX {
                preference: buffer.next_u16().ok_or(err)?,
                exchange: DomainName::deserialise(id, buffer)?,
            },
            RecordType::TXT => {
                let end = buffer.position() + rdlength as usize;
                let mut strings = Vec::new();
                while buffer.position() < end {
                    strings.push(character_string(id, buffer)?);
                }
                RecordTypeWithData::TXT { strings }
            }
            RecordType::AAAA => {
                let os: [u8; 16] = buffer
                    .take(16)
                    .ok_or(err)?
                    .try_into()
                    .map_err(|_| err)?;
                RecordTypeWithData::AAAA {
                    address: Ipv6Addr::from(os),
                }
            }
            RecordType::Unknown(tag) => RecordTypeWithData::Unknown {
                tag,
                octets: buffer.take(rdlength as usize).ok_or(err)?.to_vec(),
            },
        };

        Ok(rtype_with_data)
    }
}

/// A length-prefixed character-string of 0 to 255 octets.
fn character_string(id: u16, buffer: &mut ByteReader) -> Result<Vec<u8>, DecodeError> {
    let err = DecodeError::Truncated { id: Some(id) };
    let len = buffer.next_u8().ok_or(err)?;
    Ok(buffer.take(len as usize).ok_or(err)?.to_vec())
}

impl DomainName {
    /// Parse a domain name, following compression pointers.
    ///
    /// Constraints, all from section 4.1.4 of RFC 1035 plus a hop
    /// bound for hostile input:
    ///
    /// - a literal label is 1 to 63 octets, so a length octet with
    ///   only one of its top bits set can never be valid
    ///
    /// - a pointer may only point strictly earlier in the message than
    ///   the pointer itself
    ///
    /// - a name is at most 255 octets, and takes at most
    ///   `POINTER_HOP_LIMIT` label-or-pointer hops to decode
    ///
    /// # Errors
    ///
    /// If the domain cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ByteReader) -> Result<Self, DecodeError> {
        let mut octets = Vec::<u8>::with_capacity(DOMAINNAME_MAX_LEN);
        let mut labels = Vec::<Vec<u8>>::with_capacity(5);
        let mut hops = 0;

        // when following pointers, reading moves to a detached cursor
        // so the underlying buffer stays at the end of the name
        let mut cursor: Option<ByteReader> = None;

        loop {
            hops += 1;
            if hops > POINTER_HOP_LIMIT {
                return Err(DecodeError::MalformedName { id: Some(id) });
            }

            let rd = cursor.as_mut().unwrap_or(&mut *buffer);
            let size = rd
                .next_u8()
                .ok_or(DecodeError::Truncated { id: Some(id) })?;

            if size == 0 {
                octets.push(0);
                labels.push(Vec::new());
                break;
            } else if usize::from(size) <= LABEL_MAX_LEN {
                octets.push(size);

                let os = rd
                    .take(size as usize)
                    .ok_or(DecodeError::Truncated { id: Some(id) })?;
                let mut label = Vec::with_capacity(os.len());
                for o in os {
                    let o = o.to_ascii_lowercase();
                    label.push(o);
                    octets.push(o);
                }
                labels.push(label);

                if octets.len() > DOMAINNAME_MAX_LEN {
                    return Err(DecodeError::MalformedName { id: Some(id) });
                }
            } else if size >= 0b1100_0000 {
                let hi = size & 0b0011_1111;
                let lo = rd
                    .next_u8()
                    .ok_or(DecodeError::Truncated { id: Some(id) })?;
                let target = usize::from(u16::from_be_bytes([hi, lo]));

                // the length octet of this pointer
                let pointer_position = rd.position() - 2;
                if target >= pointer_position {
                    return Err(DecodeError::CompressionError { id: Some(id) });
                }

                let jumped = rd.at_offset(target);
                cursor = Some(jumped);
            } else {
                // 0b01xxxxxx and 0b10xxxxxx are not labels and not
                // pointers
                return Err(DecodeError::InvalidLabelLength { id: Some(id) });
            }
        }

        Ok(DomainName { octets, labels })
    }
}

/// Errors encountered when parsing a message.  Every variant carries
/// the id from the header when at least that much could be read, so
/// that a server can send a FORMERR response back to the right query.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DecodeError {
    /// The buffer ran out in the middle of a field, or a record's
    /// RDLENGTH disagrees with its contents.
    Truncated { id: Option<u16> },

    /// A name is over 255 octets, or takes too many hops to decode.
    MalformedName { id: Option<u16> },

    /// A length octet has exactly one of its top two bits set, which
    /// is neither a literal label nor a compression pointer.
    InvalidLabelLength { id: Option<u16> },

    /// A compression pointer does not point strictly earlier in the
    /// message.
    CompressionError { id: Option<u16> },

    /// A section count in the header claims more records than the
    /// buffer supplies.
    SectionCountMismatch { id: Option<u16> },
}

impl DecodeError {
    pub fn id(self) -> Option<u16> {
        match self {
            DecodeError::Truncated { id }
            | DecodeError::MalformedName { id }
            | DecodeError::InvalidLabelLength { id }
            | DecodeError::CompressionError { id }
            | DecodeError::SectionCountMismatch { id } => id,
        }
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DecodeError::Truncated { .. } => write!(f, "message ends mid-field"),
            DecodeError::MalformedName { .. } => write!(f, "domain name is malformed"),
            DecodeError::InvalidLabelLength { .. } => write!(f, "illegal label length octet"),
            DecodeError::CompressionError { .. } => {
                write!(f, "compression pointer does not point earlier in the message")
            }
            DecodeError::SectionCountMismatch { .. } => {
                write!(f, "section count claims more records than the message holds")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// A buffer which will be consumed by the parsing process.
pub struct ByteReader<'a> {
    octets: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self {
            octets,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_empty(&self) -> bool {
        self.position >= self.octets.len()
    }

    pub fn next_u8(&mut self) -> Option<u8> {
        if self.octets.len() > self.position {
            let a = self.octets[self.position];
            self.position += 1;
            Some(a)
        } else {
            None
        }
    }

    pub fn next_u16(&mut self) -> Option<u16> {
        if self.octets.len() >= self.position + 2 {
            let a = self.octets[self.position];
            let b = self.octets[self.position + 1];
            self.position += 2;
            Some(u16::from_be_bytes([a, b]))
        } else {
            None
        }
    }

    pub fn next_u32(&mut self) -> Option<u32> {
        if self.octets.len() >= self.position + 4 {
            let mut os = [0; 4];
            os.copy_from_slice(&self.octets[self.position..self.position + 4]);
            self.position += 4;
            Some(u32::from_be_bytes(os))
        } else {
            None
        }
    }

    pub fn take(&mut self, size: usize) -> Option<&'a [u8]> {
        if self.octets.len() >= self.position + size {
            let slice = &self.octets[self.position..self.position + size];
            self.position += size;
            Some(slice)
        } else {
            None
        }
    }

    /// A second reader over the same octets, at some other position.
    pub fn at_offset(&self, position: usize) -> ByteReader<'a> {
        Self {
            octets: self.octets,
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::test_util::*;

    #[test]
    fn three_octet_buffer_is_truncated() {
        assert_eq!(
            Err(DecodeError::Truncated { id: Some(0x0102) }),
            Message::from_octets(&[0x01, 0x02, 0x03])
        );
    }

    #[test]
    fn one_octet_buffer_has_no_id() {
        assert_eq!(
            Err(DecodeError::Truncated { id: None }),
            Message::from_octets(&[0x01])
        );
    }

    #[test]
    fn count_without_records_is_section_count_mismatch() {
        // qdcount = 1, but nothing follows the header
        let buf = [0x12, 0x34, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            Err(DecodeError::SectionCountMismatch { id: Some(0x1234) }),
            Message::from_octets(&buf)
        );
    }

    #[test]
    fn compressed_names_decode() {
        // a 32-octet message: question 1 is www.example.com at offset
        // 12, question 2 reuses the example.com suffix via a pointer
        // to offset 16
        let mut buf = vec![
            0x12, 0x34, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, // header
            3, b'w', b'w', b'w', // "www" at offset 12
            7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', // "example" at offset 16
            3, b'c', b'o', b'm', 0, // "com" at offset 24
        ];
        buf.extend_from_slice(&[0, 1, 0, 1]); // qtype A, qclass IN
        buf.extend_from_slice(&[0xC0, 16]); // pointer to "example.com"
        buf.extend_from_slice(&[0, 1, 0, 1]);
        let message = Message::from_octets(&buf).unwrap();

        assert_eq!(domain("www.example.com."), message.questions[0].name);
        assert_eq!(domain("example.com."), message.questions[1].name);
    }

    #[test]
    fn uppercase_labels_decode_to_lowercase() {
        let buf = [
            0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, // header
            3, b'F', b'o', b'O', 0, // "FoO."
            0, 1, 0, 1, // qtype, qclass
        ];
        let message = Message::from_octets(&buf).unwrap();
        assert_eq!(domain("foo."), message.questions[0].name);
    }

    #[test]
    fn forward_pointer_is_compression_error() {
        let buf = [
            0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, // header
            0xC0, 14, // points at itself, more or less
            0, 1, 0, 1,
        ];
        assert_eq!(
            Err(DecodeError::CompressionError { id: Some(1) }),
            Message::from_octets(&buf)
        );
    }

    #[test]
    fn reserved_length_bits_are_invalid_label_length() {
        for bad in [0b0100_0000u8, 0b1000_0000, 0b1011_1111] {
            let buf = [
                0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, // header
                bad, 0, // not a label, not a pointer
                0, 1, 0, 1,
            ];
            assert_eq!(
                Err(DecodeError::InvalidLabelLength { id: Some(1) }),
                Message::from_octets(&buf)
            );
        }
    }

    #[test]
    fn pointer_chain_over_hop_limit_is_malformed() {
        let mut buf = vec![0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];

        // a root label, then a chain of pointers each pointing at the
        // one before it
        buf.push(0); // offset 12
        let chain = POINTER_HOP_LIMIT + 10;
        for i in 0..chain {
            let target = if i == 0 { 12 } else { 13 + 2 * (i - 1) };
            #[allow(clippy::cast_possible_truncation)]
            let [hi, lo] = (target as u16).to_be_bytes();
            buf.push(0b1100_0000 | hi as u8);
            buf.push(lo);
        }

        // the question name starts at the end of the chain
        let last = 13 + 2 * (chain - 1);
        #[allow(clippy::cast_possible_truncation)]
        let [hi, lo] = (last as u16).to_be_bytes();
        buf.push(0b1100_0000 | hi as u8);
        buf.push(lo);
        buf.extend_from_slice(&[0, 1, 0, 1]);

        assert_eq!(
            Err(DecodeError::MalformedName { id: Some(1) }),
            Message::from_octets(&buf)
        );
    }

    #[test]
    fn name_over_255_octets_is_malformed() {
        let mut buf = vec![0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        for _ in 0..5 {
            buf.push(63);
            buf.extend_from_slice(&[b'x'; 63]);
        }
        buf.push(0);
        buf.extend_from_slice(&[0, 1, 0, 1]);

        assert_eq!(
            Err(DecodeError::MalformedName { id: Some(1) }),
            Message::from_octets(&buf)
        );
    }

    #[test]
    fn rdlength_mismatch_is_rejected() {
        let mut buf = vec![0, 1, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0]; // ancount = 1
        buf.extend_from_slice(&[3, b'w', b'w', b'w', 0]); // name
        buf.extend_from_slice(&[0, 1, 0, 1]); // type A, class IN
        buf.extend_from_slice(&[0, 0, 1, 44]); // ttl
        buf.extend_from_slice(&[0, 6]); // rdlength 6, but A rdata is 4
        buf.extend_from_slice(&[1, 2, 3, 4, 5, 6]);

        assert_eq!(
            Err(DecodeError::Truncated { id: Some(1) }),
            Message::from_octets(&buf)
        );
    }

    #[test]
    fn decode_error_id_recovery() {
        assert_eq!(None, DecodeError::Truncated { id: None }.id());
        assert_eq!(
            Some(77),
            DecodeError::SectionCountMismatch { id: Some(77) }.id()
        );
    }
}
