//! Standalone views over RDATA octet strings.
//!
//! Records inside a full message are decoded through the message
//! buffer, because embedded domain names may use compression pointers
//! (see `deserialise`).  This module is the other parse mode: a bare
//! RDATA slice with no enclosing message, as produced by `to_rdata`
//! and as used for fixtures.  Both modes share one implementation per
//! type.

use crate::protocol::deserialise::ByteReader;
use crate::protocol::serialise::{ByteWriter, EncodeError};
use crate::protocol::types::*;

impl RecordTypeWithData {
    /// Parse a typed payload from a standalone RDATA slice.
    ///
    /// Returns `None` if the octets are not a valid payload for the
    /// type, including when they do not fill the slice exactly (A
    /// records must be exactly 4 octets, AAAA exactly 16, and so on).
    pub fn from_rdata(rtype: RecordType, octets: &[u8]) -> Option<Self> {
        let rdlength = u16::try_from(octets.len()).ok()?;
        let mut buffer = ByteReader::new(octets);
        let parsed = Self::deserialise(0, rtype, rdlength, &mut buffer).ok()?;

        if buffer.is_empty() {
            Some(parsed)
        } else {
            None
        }
    }

    /// Emit the canonical RDATA octets for this payload.
    ///
    /// # Errors
    ///
    /// If a character-string is over 255 octets, which has no wire
    /// representation.
    pub fn to_rdata(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buffer = ByteWriter::default();
        self.serialise(&mut buffer)?;
        Ok(buffer.octets)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;
    use crate::protocol::types::test_util::*;

    fn roundtrip(rtype_with_data: &RecordTypeWithData) {
        let rdata = rtype_with_data.to_rdata().unwrap();
        assert_eq!(
            Some(rtype_with_data.clone()),
            RecordTypeWithData::from_rdata(rtype_with_data.rtype(), &rdata)
        );
    }

    #[test]
    fn a_roundtrip_and_length_check() {
        let rdata = vec![192, 168, 1, 1];
        assert_eq!(
            Some(RecordTypeWithData::A {
                address: Ipv4Addr::new(192, 168, 1, 1)
            }),
            RecordTypeWithData::from_rdata(RecordType::A, &rdata)
        );

        assert_eq!(None, RecordTypeWithData::from_rdata(RecordType::A, &[1, 2, 3]));
        assert_eq!(
            None,
            RecordTypeWithData::from_rdata(RecordType::A, &[1, 2, 3, 4, 5])
        );
    }

    #[test]
    fn aaaa_requires_exactly_16_octets() {
        let rdata = [0u8; 16];
        assert_eq!(
            Some(RecordTypeWithData::AAAA {
                address: Ipv6Addr::UNSPECIFIED
            }),
            RecordTypeWithData::from_rdata(RecordType::AAAA, &rdata)
        );
        assert_eq!(
            None,
            RecordTypeWithData::from_rdata(RecordType::AAAA, &[0u8; 15])
        );
    }

    #[test]
    fn ipv6_zero_text_form() {
        // the canonical text form of the all-zero address is "::", and
        // it parses back to the all-zero 16 octets
        let address: Ipv6Addr = "::".parse().unwrap();
        let rdata = RecordTypeWithData::AAAA { address }.to_rdata().unwrap();
        assert_eq!(vec![0u8; 16], rdata);

        if let Some(RecordTypeWithData::AAAA { address }) =
            RecordTypeWithData::from_rdata(RecordType::AAAA, &rdata)
        {
            assert_eq!("::", address.to_string());
        } else {
            panic!("expected AAAA");
        }
    }

    #[test]
    fn ipv6_text_form_compresses_zero_run() {
        let address: Ipv6Addr = "2001:db8::1".parse().unwrap();
        assert_eq!("2001:db8::1", address.to_string());
        roundtrip(&RecordTypeWithData::AAAA { address });
    }

    #[test]
    fn cname_roundtrip() {
        roundtrip(&RecordTypeWithData::CNAME {
            cname: domain("target.example.com."),
        });
    }

    #[test]
    fn mx_roundtrip_and_minimum_length() {
        roundtrip(&RecordTypeWithData::MX {
            preference: 10,
            exchange: domain("mail.example.com."),
        });

        // preference alone, with no exchange name, is not enough
        assert_eq!(None, RecordTypeWithData::from_rdata(RecordType::MX, &[0, 10]));
    }

    #[test]
    fn soa_roundtrip() {
        roundtrip(&RecordTypeWithData::SOA {
            mname: domain("ns1.example.com."),
            rname: domain("admin.example.com."),
            serial: 2023120101,
            refresh: 3600,
            retry: 1800,
            expire: 604800,
            minimum: 3600,
        });
    }

    #[test]
    fn txt_multiple_strings_roundtrip_in_order() {
        let strings: Vec<Vec<u8>> = vec![
            b"v=spf1".to_vec(),
            b"include:_spf.test.com".to_vec(),
            b"~all".to_vec(),
        ];
        let txt = RecordTypeWithData::TXT {
            strings: strings.clone(),
        };

        let rdata = txt.to_rdata().unwrap();
        if let Some(RecordTypeWithData::TXT { strings: decoded }) =
            RecordTypeWithData::from_rdata(RecordType::TXT, &rdata)
        {
            assert_eq!(strings, decoded);
        } else {
            panic!("expected TXT");
        }
    }

    #[test]
    fn txt_empty_list_is_representable() {
        let txt = RecordTypeWithData::TXT {
            strings: Vec::new(),
        };
        assert_eq!(Vec::<u8>::new(), txt.to_rdata().unwrap());
        roundtrip(&txt);
    }

    #[test]
    fn txt_single_empty_string_is_one_zero_octet() {
        let txt = RecordTypeWithData::TXT {
            strings: vec![Vec::new()],
        };
        assert_eq!(vec![0x00], txt.to_rdata().unwrap());
        roundtrip(&txt);
    }

    #[test]
    fn hinfo_is_exactly_two_character_strings() {
        roundtrip(&RecordTypeWithData::HINFO {
            cpu: b"VAX-11/780".to_vec(),
            os: b"UNIX".to_vec(),
        });

        // one character-string, or trailing octets, do not parse
        assert_eq!(
            None,
            RecordTypeWithData::from_rdata(RecordType::HINFO, &[3, b'c', b'p', b'u'])
        );
        assert_eq!(
            None,
            RecordTypeWithData::from_rdata(RecordType::HINFO, &[1, b'c', 1, b'o', 0xFF])
        );
    }

    #[test]
    fn wks_roundtrip_and_minimum_length() {
        roundtrip(&RecordTypeWithData::WKS {
            address: Ipv4Addr::new(10, 0, 0, 1),
            protocol: 6,
            bitmap: vec![0b1000_0000, 0b0100_0000],
        });

        assert_eq!(
            None,
            RecordTypeWithData::from_rdata(RecordType::WKS, &[10, 0, 0, 1])
        );
    }

    #[test]
    fn unknown_rdata_is_opaque() {
        let octets = vec![1, 2, 3, 4, 5];
        if let Some(rd) = RecordTypeWithData::from_rdata(RecordType::from(999), &octets) {
            assert_eq!(octets, rd.to_rdata().unwrap());
        } else {
            panic!("expected unknown rdata to parse");
        }
    }

    #[test]
    fn arbitrary_rdata_roundtrips() {
        for _ in 0..100 {
            let rr = arbitrary_resourcerecord();
            roundtrip(&rr.rtype_with_data);
        }
    }
}
