//! CBOR envelopes carried inside witness scripts
//!
//! Two shapes are recognised:
//! - token info: `OP_0 OP_IF "cat" OP_1 <push>... OP_ENDIF` inside a commit redeem script,
//! - buy orders: instruction 3 pushes `"order"`, instruction 5 pushes `{args, md5}`.
//!
//! Anything that does not decode is simply "not this envelope".

use bitcoin::opcodes::all::{OP_ENDIF, OP_IF, OP_PUSHNUM_1};
use bitcoin::script::Instruction;
use bitcoin::Script;
use ciborium::value::{Integer, Value};
use serde_json::{Map, Number, Value as Json};

use crate::constants::{BUY_ORDER_TAG, TAPROOT_LOCKING_SCRIPT_LENGTH, TAPROOT_PREFIX};

const ENVELOPE_TAG: &[u8] = b"cat";
const CBOR_TAG_POSITIVE_BIGNUM: u64 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// The whole decoded map, `minterMd5` and supply parameters included
    pub raw: Json,
}

impl TokenMetadata {
    pub fn minter_md5(&self) -> Option<&str> {
        self.raw.get("minterMd5").and_then(|v| v.as_str())
    }
}

/// Concatenated pushes of the first `OP_0 OP_IF "cat" OP_1 ... OP_ENDIF` envelope
fn envelope_payload(script: &Script) -> Option<Vec<u8>> {
    let instructions: Vec<Instruction> = script.instructions().collect::<Result<_, _>>().ok()?;
    let start = instructions.windows(4).position(|window| {
        matches!(window[0], Instruction::PushBytes(bytes) if bytes.is_empty())
            && window[1] == Instruction::Op(OP_IF)
            && matches!(window[2], Instruction::PushBytes(bytes) if bytes.as_bytes() == ENVELOPE_TAG)
            && window[3] == Instruction::Op(OP_PUSHNUM_1)
    })?;

    let mut payload = Vec::new();
    for instruction in &instructions[start + 4..] {
        match instruction {
            Instruction::PushBytes(bytes) => payload.extend_from_slice(bytes.as_bytes()),
            Instruction::Op(op) if *op == OP_ENDIF => return Some(payload),
            Instruction::Op(_) => return None,
        }
    }
    None
}

pub fn parse_token_info(redeem_script: &Script) -> Option<TokenMetadata> {
    let payload = envelope_payload(redeem_script)?;
    let value: Value = ciborium::from_reader(payload.as_slice()).ok()?;
    let raw = cbor_to_json(&value)?;
    let name = raw.get("name")?.as_str()?.to_string();
    let symbol = raw.get("symbol")?.as_str()?.to_string();
    let decimals = u8::try_from(raw.get("decimals")?.as_u64()?).ok()?;
    Some(TokenMetadata {
        name,
        symbol,
        decimals,
        raw,
    })
}

/// Decoded buy-order commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyOrderArgs {
    /// Locking script of the token being bought
    pub cat20_script: Vec<u8>,
    pub buyer_address: Vec<u8>,
    pub price: i64,
}

impl BuyOrderArgs {
    /// Token output key, the script without its `OP_1 OP_PUSHBYTES_32` prefix
    pub fn token_pubkey(&self) -> &[u8] {
        &self.cat20_script[2..]
    }
}

/// Decode a buy-order commit script and check it against the expected contract `md5`.
pub fn decode_buy_order(script: &Script, expected_md5: &str) -> Option<BuyOrderArgs> {
    let mut pushes = Vec::with_capacity(6);
    for instruction in script.instructions().take(6) {
        pushes.push(match instruction.ok()? {
            Instruction::PushBytes(bytes) => Some(bytes.as_bytes().to_vec()),
            Instruction::Op(_) => None,
        });
    }
    if pushes.len() < 6 || pushes[3].as_deref() != Some(BUY_ORDER_TAG) {
        return None;
    }
    let payload = pushes[5].as_ref()?;
    let value: Value = ciborium::from_reader(payload.as_slice()).ok()?;
    let map = value.as_map()?;

    let md5 = map_get(map, "md5")?.as_text()?;
    if md5 != expected_md5 {
        return None;
    }
    let args = map_get(map, "args")?.as_array()?;
    if args.len() < 3 {
        return None;
    }

    let cat20_script = hex::decode(args[0].as_text()?).ok()?;
    if cat20_script.len() != TAPROOT_LOCKING_SCRIPT_LENGTH || cat20_script[..2] != TAPROOT_PREFIX {
        return None;
    }
    let buyer_address = hex::decode(args[1].as_text()?).ok()?;
    let price = cbor_positive_i64(&args[2])?;

    Some(BuyOrderArgs {
        cat20_script,
        buyer_address,
        price,
    })
}

fn map_get<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

fn cbor_positive_i64(value: &Value) -> Option<i64> {
    let n: i128 = match value {
        Value::Integer(int) => i128::from(*int),
        Value::Tag(CBOR_TAG_POSITIVE_BIGNUM, inner) => {
            let bytes = inner.as_bytes()?;
            if bytes.len() > 8 {
                return None;
            }
            bytes.iter().fold(0i128, |acc, b| (acc << 8) | *b as i128)
        }
        _ => return None,
    };
    if n <= 0 {
        return None;
    }
    i64::try_from(n).ok()
}

fn integer_to_json(int: Integer) -> Option<Json> {
    let n = i128::from(int);
    if let Ok(n) = i64::try_from(n) {
        Some(Json::Number(Number::from(n)))
    } else if let Ok(n) = u64::try_from(n) {
        Some(Json::Number(Number::from(n)))
    } else {
        Some(Json::String(n.to_string()))
    }
}

/// JSON rendering of CBOR metadata. Byte strings become hex, non-text keys their JSON text.
pub fn cbor_to_json(value: &Value) -> Option<Json> {
    Some(match value {
        Value::Integer(int) => integer_to_json(*int)?,
        Value::Bytes(bytes) => Json::String(hex::encode(bytes)),
        Value::Float(f) => Json::Number(Number::from_f64(*f)?),
        Value::Text(text) => Json::String(text.clone()),
        Value::Bool(b) => Json::Bool(*b),
        Value::Null => Json::Null,
        Value::Tag(CBOR_TAG_POSITIVE_BIGNUM, inner) => match cbor_positive_i64(value) {
            Some(n) => Json::Number(Number::from(n)),
            None => Json::String(hex::encode(inner.as_bytes()?)),
        },
        Value::Tag(_, inner) => cbor_to_json(inner)?,
        Value::Array(items) => Json::Array(items.iter().map(cbor_to_json).collect::<Option<_>>()?),
        Value::Map(entries) => {
            let mut map = Map::new();
            for (k, v) in entries {
                let key = match k {
                    Value::Text(text) => text.clone(),
                    other => cbor_to_json(other)?.to_string(),
                };
                map.insert(key, cbor_to_json(v)?);
            }
            Json::Object(map)
        }
        _ => return None,
    })
}
