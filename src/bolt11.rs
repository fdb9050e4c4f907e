// =============================================================================
// SATKAS - Built-in BOLT11 Decoder
// =============================================================================
//
// Used when no lncli is configured. Reads the fields a swap needs:
//
//   hrp:  ln<currency>[<amount><multiplier>]
//   data: timestamp (35 bits) | tagged fields | signature (104 words) | checksum
//
// Tagged fields: type (5 bits), length in words (10 bits), value.
// Only `p` (payment hash) and `x` (expiry) are read, everything else is
// skipped. The node signature is not checked.
//
// =============================================================================

use log::debug;

use crate::address::{convert_bits_strict, CHARSET};
use crate::invoice::{DecodedInvoice, InvoiceError};

const CHECKSUM_WORDS: usize = 6;
const SIGNATURE_WORDS: usize = 104;
const TIMESTAMP_WORDS: usize = 7;

const TAG_PAYMENT_HASH: u8 = 1;
const TAG_EXPIRY: u8 = 6;
const PAYMENT_HASH_WORDS: usize = 52;

/// Expiry when the invoice carries no `x` field
pub const DEFAULT_EXPIRY_SECS: u64 = 3600;

fn err(msg: &str) -> InvoiceError {
    InvoiceError::Decode(msg.to_string())
}

/// Decodes a BOLT11 payment request without a Lightning node
pub fn decode_invoice(invoice: &str) -> Result<DecodedInvoice, InvoiceError> {
    let invoice = invoice.trim();
    if invoice.chars().any(|c| c.is_ascii_lowercase()) && invoice.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(err("mixed case"));
    }
    let invoice = invoice.to_ascii_lowercase();

    let pos = invoice.rfind('1').ok_or_else(|| err("no separator"))?;
    let (hrp, data_part) = (&invoice[..pos], &invoice[pos + 1..]);

    let mut words = Vec::with_capacity(data_part.len());
    for c in data_part.bytes() {
        let index = CHARSET
            .iter()
            .position(|&x| x == c)
            .ok_or_else(|| InvoiceError::Decode(format!("invalid character '{}'", c as char)))?;
        words.push(index as u8);
    }
    if words.len() < TIMESTAMP_WORDS + SIGNATURE_WORDS + CHECKSUM_WORDS {
        return Err(err("too short"));
    }
    if !verify_checksum(hrp, &words) {
        return Err(err("bad checksum"));
    }

    let amount_msat = parse_hrp_amount(hrp)?;
    let data = &words[..words.len() - CHECKSUM_WORDS];
    let timestamp = words_to_u64(&data[..TIMESTAMP_WORDS]);
    let fields = &data[TIMESTAMP_WORDS..data.len() - SIGNATURE_WORDS];

    let mut payment_hash = None;
    let mut expiry = DEFAULT_EXPIRY_SECS;
    let mut i = 0;
    while i < fields.len() {
        if i + 3 > fields.len() {
            return Err(err("truncated field header"));
        }
        let tag = fields[i];
        let len = fields[i + 1] as usize * 32 + fields[i + 2] as usize;
        let value = fields.get(i + 3..i + 3 + len).ok_or_else(|| err("truncated field"))?;
        i += 3 + len;

        match tag {
            // a hash of the wrong length must be skipped
            TAG_PAYMENT_HASH if len == PAYMENT_HASH_WORDS && payment_hash.is_none() => {
                let bytes = convert_bits_strict(value, 5, 8).map_err(|e| InvoiceError::Decode(e.to_string()))?;
                payment_hash = bytes.try_into().ok();
            }
            TAG_EXPIRY => {
                if len > 12 {
                    return Err(err("expiry too large"));
                }
                expiry = words_to_u64(value);
            }
            _ => {}
        }
    }

    let payment_hash = payment_hash.ok_or_else(|| err("missing payment hash"))?;
    debug!("Decoded invoice locally: {} msat, timestamp {}, expiry {}", amount_msat, timestamp, expiry);
    Ok(DecodedInvoice { amount_msat, timestamp, expiry, payment_hash })
}

/// Amount in millisatoshi from the human readable part; 0 when absent
pub fn parse_hrp_amount(hrp: &str) -> Result<u64, InvoiceError> {
    let rest = hrp.strip_prefix("ln").ok_or_else(|| err("prefix must start with 'ln'"))?;
    let amount = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    if rest.len() == amount.len() {
        return Err(err("missing currency"));
    }
    if amount.is_empty() {
        return Ok(0);
    }

    let (digits, multiplier) = match amount.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&amount[..amount.len() - 1], Some(c)),
        _ => (amount, None),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(InvoiceError::Decode(format!("invalid amount '{}'", amount)));
    }
    let value: u64 = digits.parse().map_err(|_| err("amount too large"))?;

    // 1 BTC = 10^11 msat
    let msat = match multiplier {
        None => value.checked_mul(100_000_000_000),
        Some('m') => value.checked_mul(100_000_000),
        Some('u') => value.checked_mul(100_000),
        Some('n') => value.checked_mul(100),
        Some('p') if value % 10 == 0 => Some(value / 10),
        Some('p') => return Err(err("sub-millisatoshi amount")),
        Some(c) => return Err(InvoiceError::Decode(format!("unknown multiplier '{}'", c))),
    };
    msat.ok_or_else(|| err("amount too large"))
}

fn words_to_u64(words: &[u8]) -> u64 {
    words.iter().fold(0u64, |acc, w| (acc << 5) | *w as u64)
}

fn polymod(values: &[u8]) -> u32 {
    let generator: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];
    let mut chk: u32 = 1;

    for v in values {
        let top = chk >> 25;
        chk = ((chk & 0x1ffffff) << 5) ^ (*v as u32);
        for (i, g) in generator.iter().enumerate() {
            if (top >> i) & 1 == 1 {
                chk ^= g;
            }
        }
    }

    chk
}

fn verify_checksum(hrp: &str, data: &[u8]) -> bool {
    let mut values: Vec<u8> = hrp.bytes().map(|c| c >> 5).collect();
    values.push(0);
    values.extend(hrp.bytes().map(|c| c & 31));
    values.extend_from_slice(data);
    polymod(&values) == 1
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // BOLT11 test vectors
    const COFFEE: &str = "lnbc2500u1pvjluezsp5zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zygspp5qqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqypqdq5xysxxatsyp3k7enxv4jsxqzpu9qrsgquk0rl77nj30yxdy8j9vdx85fkpmdla2087ne0xh8nhedh8w27kyke0lp53ut353s06fv3qfegext0eh0ymjpf39tuven09sam30g4vgpfna3rh";
    const DONATION: &str = "lnbc1pvjluezsp5zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zygspp5qqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqypqdpl2pkx2ctnv5sxxmmwwd5kgetjypeh2ursdae8g6twvus8g6rfwvs8qun0dfjkxaq9qrsgq357wnc5r2ueh7ck6q93dj32dlqnls087fxdwk8qakdyafkq3yap9us6v52vjjsrvywa6rt52cm9r9zqt8r2t7mlcwspyetp5h2tztugp9lfyql";
    const HASH: &str = "0001020304050607080900010203040506070809000102030405060708090102";

    #[test]
    fn test_decode_coffee_invoice() {
        let decoded = decode_invoice(COFFEE).unwrap();
        assert_eq!(decoded.amount_msat, 250_000_000);
        assert_eq!(decoded.sat_amount(), 250_000);
        assert_eq!(decoded.timestamp, 1496314658);
        assert_eq!(decoded.expiry, 60);
        assert_eq!(hex::encode(decoded.payment_hash), HASH);
        assert_eq!(decoded.timelock_millis(), 1_496_314_718_000);

        assert_eq!(decode_invoice(&COFFEE.to_uppercase()).unwrap(), decoded);
    }

    #[test]
    fn test_decode_without_amount_or_expiry() {
        let decoded = decode_invoice(DONATION).unwrap();
        assert_eq!(decoded.amount_msat, 0);
        assert_eq!(decoded.expiry, DEFAULT_EXPIRY_SECS);
        assert_eq!(hex::encode(decoded.payment_hash), HASH);
    }

    #[test]
    fn test_corrupted_invoice_rejected() {
        let mut chars: Vec<char> = COFFEE.chars().collect();
        let i = chars.len() - 20;
        chars[i] = if chars[i] == 'q' { 'p' } else { 'q' };
        let flipped: String = chars.into_iter().collect();
        assert_eq!(decode_invoice(&flipped), Err(err("bad checksum")));

        assert!(decode_invoice("lnbc2500u1qqqq").is_err());
        assert!(decode_invoice("lnbc2500u1pvjluezb").is_err());
        assert!(decode_invoice("").is_err());
    }

    #[test]
    fn test_hrp_amounts() {
        assert_eq!(parse_hrp_amount("lnbc").unwrap(), 0);
        assert_eq!(parse_hrp_amount("lnbc20m").unwrap(), 2_000_000_000);
        assert_eq!(parse_hrp_amount("lntb2500u").unwrap(), 250_000_000);
        assert_eq!(parse_hrp_amount("lnbcrt10n").unwrap(), 1_000);
        assert_eq!(parse_hrp_amount("lnbc10p").unwrap(), 1);
        assert_eq!(parse_hrp_amount("lnbc1").unwrap(), 100_000_000_000);

        assert!(parse_hrp_amount("lnbc15p").is_err());
        assert!(parse_hrp_amount("lnbc5x").is_err());
        assert!(parse_hrp_amount("bc25u").is_err());
        assert!(parse_hrp_amount("lnbc99999999999999999999m").is_err());
        assert!(parse_hrp_amount("lnbc200000000000m").is_err());
    }
}
