use std::sync::Once;
use tokenflow::{
    graph::{GraphOptions, GraphSession, NodeId, TxId},
    hooks::{on_post_instruction, on_pre_instruction, InstructionEvent, PostInstructionEvent},
    value::Value,
};

static INIT_LOGGER: Once = Once::new();

pub fn init() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Drives a session through the instruction hooks like a host engine would.
#[allow(dead_code)]
pub struct Tracer {
    pub session: GraphSession,
    function: String,
    tx_id: TxId,
    address: u64,
}

#[allow(dead_code)]
impl Tracer {
    pub fn new(function: &str) -> Self {
        Self::with_options(function, GraphOptions::default())
    }

    pub fn with_options(function: &str, options: GraphOptions) -> Self {
        init();

        Self {
            session: GraphSession::new(options),
            function: function.to_string(),
            tx_id: 1,
            address: 0,
        }
    }

    /// Continue tracing in another function or transaction.
    pub fn switch(&mut self, function: &str, tx_id: TxId) {
        self.function = function.to_string();
        self.tx_id = tx_id;
    }

    pub fn pre(&mut self, opcode: &str, operands: &[&str]) -> NodeId {
        let address = self.address + 1;
        self.pre_at(address, opcode, operands)
    }

    pub fn pre_at(&mut self, address: u64, opcode: &str, operands: &[&str]) -> NodeId {
        self.address = address;

        let event = InstructionEvent {
            function: self.function.clone(),
            tx_id: self.tx_id,
            opcode: opcode.to_string(),
            address,
            operands: operands.iter().map(|o| Value::word(*o)).collect(),
            call_data: None,
            log_data: None,
        };

        on_pre_instruction(&mut self.session, &event, None)
            .unwrap_or_else(|| panic!("{} at {} creates a node", opcode, address))
    }

    pub fn post(&mut self, opcode: &str, result: &str) -> NodeId {
        let event = PostInstructionEvent {
            function: self.function.clone(),
            opcode: opcode.to_string(),
            result: Value::word(result),
        };

        on_post_instruction(&mut self.session, &event, None)
            .unwrap_or_else(|| panic!("{} has a pending node", opcode))
    }

    /// Pre and post hook of one instruction.
    pub fn exec(&mut self, opcode: &str, operands: &[&str], result: &str) -> NodeId {
        let uid = self.pre(opcode, operands);
        assert_eq!(self.post(opcode, result), uid);
        uid
    }
}

/// Trace of `transfer(address,uint256)` of a minimal ERC20 token.
#[allow(dead_code)]
pub struct Transfer {
    pub tracer: Tracer,
    pub to: NodeId,
    pub amount: NodeId,
    pub caller: NodeId,
    pub from_slot: NodeId,
    pub from_balance: NodeId,
    pub debit: NodeId,
    pub debit_store: NodeId,
    pub to_slot: NodeId,
    pub to_balance: NodeId,
    pub credit: NodeId,
    pub credit_store: NodeId,
    pub stop: NodeId,
}

#[allow(dead_code)]
pub const FROM_SLOT: &str = "keccak256_512(Concat(0,caller,0))";
#[allow(dead_code)]
pub const TO_SLOT: &str = "keccak256_512(Concat(4_calldata[4:35],0))";

#[allow(dead_code)]
pub fn transfer() -> Transfer {
    let mut t = Tracer::new("transfer(address,uint256)");

    let to = t.exec("CALLDATALOAD", &["4"], "4_calldata[4:35]");
    let amount = t.exec("CALLDATALOAD", &["36"], "4_calldata[36:67]");
    let caller = t.exec("CALLER", &[], "caller");
    let from_slot = t.exec("SHA3", &["Concat(0,caller,0)"], FROM_SLOT);
    let from_balance = t.exec("SLOAD", &[FROM_SLOT], "balance_from");
    let debit = t.exec(
        "SUB",
        &["balance_from", "4_calldata[36:67]"],
        "balance_from-4_calldata[36:67]",
    );
    let debit_store = t.pre("SSTORE", &[FROM_SLOT, "balance_from-4_calldata[36:67]"]);
    let to_slot = t.exec("SHA3", &["Concat(4_calldata[4:35],0)"], TO_SLOT);
    let to_balance = t.exec("SLOAD", &[TO_SLOT], "balance_to");
    let credit = t.exec(
        "ADD",
        &["balance_to", "4_calldata[36:67]"],
        "balance_to+4_calldata[36:67]",
    );
    let credit_store = t.pre("SSTORE", &[TO_SLOT, "balance_to+4_calldata[36:67]"]);
    let stop = t.pre("STOP", &[]);

    Transfer {
        tracer: t,
        to,
        amount,
        caller,
        from_slot,
        from_balance,
        debit,
        debit_store,
        to_slot,
        to_balance,
        credit,
        credit_store,
        stop,
    }
}
