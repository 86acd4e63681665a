//! Just enough DER to reach the subject public key of an X.509 certificate.

const TAG_SEQUENCE: u8 = 0x30;
const TAG_BIT_STRING: u8 = 0x03;
const TAG_EXPLICIT_VERSION: u8 = 0xA0;

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Next tag and its content. `None` on truncated or indefinite-length input.
    fn read_tlv(&mut self) -> Option<(u8, &'a [u8])> {
        let (&tag, rest) = self.data.split_first()?;
        let (&first, rest) = rest.split_first()?;

        let (len, rest) = if first < 0x80 {
            (usize::from(first), rest)
        } else {
            let count = usize::from(first & 0x7F);
            if count == 0 || count > 4 || rest.len() < count {
                return None;
            }
            let (bytes, rest) = rest.split_at(count);
            let len = bytes
                .iter()
                .fold(0usize, |len, &byte| (len << 8) | usize::from(byte));
            (len, rest)
        };

        if rest.len() < len {
            return None;
        }
        let (content, rest) = rest.split_at(len);
        self.data = rest;
        Some((tag, content))
    }

    fn expect(&mut self, tag: u8) -> Option<&'a [u8]> {
        self.read_tlv()
            .and_then(|(found, content)| (found == tag).then_some(content))
    }
}

/// Raw `subjectPublicKey` bits of a DER certificate.
///
/// For EC keys this is the encoded point, for RSA keys the
/// `RSAPublicKey` structure.
pub fn subject_public_key(certificate: &[u8]) -> Option<&[u8]> {
    let certificate = Reader::new(certificate).expect(TAG_SEQUENCE)?;
    let tbs = Reader::new(certificate).expect(TAG_SEQUENCE)?;

    let mut tbs = Reader::new(tbs);
    let (tag, _) = tbs.read_tlv()?;
    if tag == TAG_EXPLICIT_VERSION {
        // serial number
        tbs.read_tlv()?;
    }
    // signature algorithm, issuer, validity, subject
    for _ in 0..4 {
        tbs.read_tlv()?;
    }

    let mut spki = Reader::new(tbs.expect(TAG_SEQUENCE)?);
    spki.expect(TAG_SEQUENCE)?;
    let bits = spki.expect(TAG_BIT_STRING)?;
    // first byte is the unused-bits count
    bits.split_first().map(|(_, key)| key)
}
