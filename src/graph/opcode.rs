use super::{GraphError, NodeType};
use lazy_static::lazy_static;
use regex::Regex;
use std::{fmt, str::FromStr};
use strum::{EnumString, IntoStaticStr};

lazy_static! {
    static ref NUMBERED: Regex = Regex::new(r"^(PUSH|DUP|SWAP|LOG)([0-9]{1,2})$").unwrap();
}

/// EVM instruction mnemonics as reported by the host engine.
///
/// The numbered families carry their index (`PUSH32` is `Push(32)`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, IntoStaticStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Opcode {
    Stop,
    Add,
    Mul,
    Sub,
    Div,
    Sdiv,
    Mod,
    Smod,
    Addmod,
    Mulmod,
    Exp,
    Signextend,
    Lt,
    Gt,
    Slt,
    Sgt,
    Eq,
    Iszero,
    And,
    Or,
    Xor,
    Not,
    Byte,
    Shl,
    Shr,
    Sar,
    #[strum(to_string = "SHA3", serialize = "KECCAK256")]
    Sha3,
    Address,
    Balance,
    Origin,
    Caller,
    Callvalue,
    Calldataload,
    Calldatasize,
    Calldatacopy,
    Codesize,
    Codecopy,
    Gasprice,
    Extcodesize,
    Extcodecopy,
    Returndatasize,
    Returndatacopy,
    Extcodehash,
    Blockhash,
    Coinbase,
    Timestamp,
    Number,
    Difficulty,
    Gaslimit,
    Chainid,
    Selfbalance,
    Basefee,
    Pop,
    Mload,
    Mstore,
    Mstore8,
    Sload,
    Sstore,
    Jump,
    Jumpi,
    Pc,
    Msize,
    Gas,
    Jumpdest,
    Push(u8),
    Dup(u8),
    Swap(u8),
    Log(u8),
    Create,
    Call,
    Callcode,
    Return,
    Delegatecall,
    Create2,
    Staticcall,
    Revert,
    Invalid,
    Selfdestruct,
}

impl Opcode {
    /// Parse a mnemonic, case-insensitively, including the numbered families.
    pub fn from_mnemonic(text: &str) -> Result<Self, GraphError> {
        let upper = text.trim().to_ascii_uppercase();
        let unknown = || GraphError::UnknownOpcode(text.to_string());

        if let Some(captures) = NUMBERED.captures(&upper) {
            let index = captures[2].parse::<u8>().map_err(|_| unknown())?;

            return match (&captures[1], index) {
                ("PUSH", 0..=32) => Ok(Opcode::Push(index)),
                ("DUP", 1..=16) => Ok(Opcode::Dup(index)),
                ("SWAP", 1..=16) => Ok(Opcode::Swap(index)),
                ("LOG", 0..=4) => Ok(Opcode::Log(index)),
                _ => Err(unknown()),
            };
        }

        match Opcode::from_str(&upper) {
            Ok(Opcode::Push(_)) | Ok(Opcode::Dup(_)) | Ok(Opcode::Swap(_)) | Ok(Opcode::Log(_)) => {
                Err(unknown())
            }
            Ok(opcode) => Ok(opcode),
            Err(_) => Err(unknown()),
        }
    }

    /// Category a node for this opcode gets unless the caller overrides it.
    pub fn default_type(&self) -> NodeType {
        use Opcode::*;

        match self {
            Mload | Mstore | Mstore8 | Sload | Sstore => NodeType::StateVariable,
            Calldataload | Calldatasize | Caller | Address | Origin | Callvalue | Balance
            | Selfbalance | Timestamp | Number | Chainid => NodeType::EnvironmentContext,
            Push(_) | Add | Mul | Sub | Div | Sdiv | Mod | Smod | Addmod | Mulmod | Exp
            | Signextend | Lt | Gt | Slt | Sgt | Eq | Iszero | And | Or | Xor | Not | Byte
            | Shl | Shr | Sar | Sha3 => NodeType::DataFlow,
            Log(_) => NodeType::LogInformation,
            Jump | Jumpi | Jumpdest | Call | Callcode | Delegatecall | Staticcall | Stop
            | Return | Revert | Selfdestruct | Invalid => NodeType::ControlFlow,
            _ => NodeType::Unknown,
        }
    }

    /// Instructions a node is created for before they execute.
    pub fn is_pre_hooked(&self) -> bool {
        use Opcode::*;

        matches!(
            self,
            Sstore
                | Log(2..=4)
                | Sload
                | Sha3
                | Calldataload
                | And
                | Or
                | Caller
                | Address
                | Stop
                | Return
                | Revert
                | Add
                | Sub
                | Call
                | Delegatecall
                | Iszero
                | Jumpdest
                | Jump
                | Jumpi
        )
    }

    /// Instructions whose result completes their node after execution.
    pub fn is_post_hooked(&self) -> bool {
        use Opcode::*;

        matches!(
            self,
            And | Or
                | Sha3
                | Sload
                | Caller
                | Address
                | Calldataload
                | Add
                | Sub
                | Iszero
                | Call
                | Delegatecall
        )
    }

    pub fn is_jump(&self) -> bool {
        matches!(self, Opcode::Jump | Opcode::Jumpi)
    }

    pub fn is_halt(&self) -> bool {
        matches!(
            self,
            Opcode::Stop | Opcode::Return | Opcode::Revert | Opcode::Selfdestruct | Opcode::Invalid
        )
    }

    pub fn is_call(&self) -> bool {
        matches!(
            self,
            Opcode::Call | Opcode::Callcode | Opcode::Delegatecall | Opcode::Staticcall
        )
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Opcode::Sload | Opcode::Sstore)
    }

    pub fn is_mask(&self) -> bool {
        matches!(self, Opcode::And | Opcode::Or)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Opcode::Push(i) => write!(f, "PUSH{}", i),
            Opcode::Dup(i) => write!(f, "DUP{}", i),
            Opcode::Swap(i) => write!(f, "SWAP{}", i),
            Opcode::Log(i) => write!(f, "LOG{}", i),
            other => {
                let name: &'static str = other.into();
                f.write_str(name)
            }
        }
    }
}
