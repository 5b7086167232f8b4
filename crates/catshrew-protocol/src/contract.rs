//! sCrypt artifact instantiation
//!
//! An artifact's `hex` is the compiled script with one `<name>` placeholder per constructor
//! parameter. Instantiating replaces each placeholder with the script encoding of its argument;
//! the resulting tapscript is committed as the single leaf of a P2TR output under the NUMS key.

use anyhow::{anyhow, Context, Result};
use bitcoin::opcodes::all::{OP_PUSHBYTES_0, OP_PUSHNUM_1};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{Secp256k1, XOnlyPublicKey};
use bitcoin::taproot::{LeafVersion, TaprootBuilder};
use bitcoin::{Script, ScriptBuf};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

use crate::constants::NUMS_INTERNAL_KEY;
use crate::taproot::XOnlyKey;

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptArg {
    Bytes(Vec<u8>),
    Int(i64),
    Bool(bool),
}

impl ScriptArg {
    fn encode(&self) -> Result<ScriptBuf> {
        Ok(match self {
            ScriptArg::Bytes(bytes) => {
                let push = PushBytesBuf::try_from(bytes.clone())
                    .map_err(|_| anyhow!("push of {} bytes is too large", bytes.len()))?;
                Builder::new().push_slice(push).into_script()
            }
            ScriptArg::Int(value) => Builder::new().push_int(*value).into_script(),
            ScriptArg::Bool(true) => Builder::new().push_opcode(OP_PUSHNUM_1).into_script(),
            ScriptArg::Bool(false) => Builder::new().push_opcode(OP_PUSHBYTES_0).into_script(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AbiParam {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AbiEntity {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    params: Vec<AbiParam>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractArtifact {
    pub md5: String,
    pub hex: String,
    #[serde(default)]
    abi: Vec<AbiEntity>,
}

impl ContractArtifact {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading artifact {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("parsing artifact {}", path.display()))
    }

    /// Placeholder names in constructor order
    pub fn constructor_params(&self) -> Vec<String> {
        if let Some(ctor) = self.abi.iter().find(|entity| entity.kind == "constructor") {
            return ctor.params.iter().map(|p| p.name.clone()).collect();
        }
        let mut names: Vec<String> = Vec::new();
        let mut rest = self.hex.as_str();
        while let Some(open) = rest.find('<') {
            let after = &rest[open + 1..];
            match after.find('>') {
                Some(close) => {
                    let name = &after[..close];
                    if !names.iter().any(|n| n == name) {
                        names.push(name.to_string());
                    }
                    rest = &after[close + 1..];
                }
                None => break,
            }
        }
        names
    }

    /// Tapscript with every placeholder substituted
    pub fn instantiate(&self, args: &[ScriptArg]) -> Result<ScriptBuf> {
        let params = self.constructor_params();
        let mut out = String::with_capacity(self.hex.len());
        let mut rest = self.hex.as_str();
        while let Some(open) = rest.find('<') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after
                .find('>')
                .ok_or_else(|| anyhow!("unterminated placeholder in artifact {}", self.md5))?;
            let name = &after[..close];
            let index = params
                .iter()
                .position(|p| p == name)
                .ok_or_else(|| anyhow!("unknown placeholder <{}>", name))?;
            let arg = args
                .get(index)
                .ok_or_else(|| anyhow!("missing constructor argument {}", name))?;
            out.push_str(&hex::encode(arg.encode()?.as_bytes()));
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        Ok(ScriptBuf::from_bytes(hex::decode(&out)?))
    }

    /// P2TR locking script of the instantiated contract
    pub fn locking_script(&self, args: &[ScriptArg]) -> Result<ScriptBuf> {
        Ok(script_path_spend(&self.instantiate(args)?)?.script_pubkey)
    }
}

/// Single-leaf Taproot commitment of a tapscript
#[derive(Debug, Clone)]
pub struct ScriptPathSpend {
    pub output_key: XOnlyKey,
    pub script_pubkey: ScriptBuf,
    pub control_block: Vec<u8>,
}

pub fn script_path_spend(script: &Script) -> Result<ScriptPathSpend> {
    let secp = Secp256k1::verification_only();
    let internal_key = XOnlyPublicKey::from_str(NUMS_INTERNAL_KEY)?;
    let info = TaprootBuilder::new()
        .add_leaf(0, script.to_owned())?
        .finalize(&secp, internal_key)
        .map_err(|_| anyhow!("incomplete taproot tree"))?;
    let control_block = info
        .control_block(&(script.to_owned(), LeafVersion::TapScript))
        .ok_or_else(|| anyhow!("leaf not in taproot tree"))?;
    let output_key = info.output_key();
    Ok(ScriptPathSpend {
        output_key: output_key.to_inner().serialize(),
        script_pubkey: ScriptBuf::new_p2tr_tweaked(output_key),
        control_block: control_block.serialize(),
    })
}
