mod utils;

use tokenflow::graph::{GraphOptions, NodeType};
use utils::{transfer, Tracer};

#[test]
fn uids_increase_and_survive_tombstoning() {
    let mut t = Tracer::new("f");

    let mut created = vec![t.exec("CALLER", &[], "caller")];
    created.push(t.exec("AND", &["x", "y"], "x&y"));
    created.push(t.exec("ADD", &["caller", "1"], "caller+1"));
    created.push(t.pre("STOP", &[]));

    assert!(created.windows(2).all(|w| w[0] < w[1]), "{:?}", created);
    assert_eq!(
        t.session.get_node(created[1]).unwrap().node_type,
        NodeType::Deleted
    );
    for (index, node) in t.session.nodes().enumerate() {
        assert_eq!(node.uid, index);
    }
}

#[test]
fn predecessors_are_earlier_and_in_the_same_transaction() {
    let mut t = Tracer::new("f");

    t.exec("CALLER", &[], "caller");
    t.exec("ADD", &["caller", "1"], "caller+1");

    t.switch("f", 2);
    t.exec("ADD", &["caller", "1"], "caller+1");
    t.pre("SSTORE", &["0", "caller+1"]);

    t.switch("g", 1);
    t.pre("SSTORE", &["0", "caller"]);

    let session = &t.session;

    for node in session.nodes().filter(|n| !n.is_sentinel()) {
        for pred in node.predecessors() {
            let pred_node = session.node(pred).unwrap();

            assert!(pred < node.uid, "{} feeds earlier node {}", pred, node.uid);
            assert_eq!(pred_node.function, node.function);
            assert!(pred_node.is_sentinel() || pred_node.tx_id == node.tx_id);
        }
    }
}

#[test]
fn storage_reads_see_the_latest_write() {
    let mut t = Tracer::new("f");

    let amount = t.exec("CALLDATALOAD", &["4"], "4_calldata[4:35]");
    let store = t.pre("SSTORE", &["7", "4_calldata[4:35]"]);
    let load = t.exec("SLOAD", &["7"], "4_calldata[4:35]");

    let session = &mut t.session;
    assert_eq!(session.node(load).unwrap().slots[1].preds, vec![store]);

    let written = session.node(store).unwrap().slots[1].preds.clone();
    let through_load = session.find_start_node_ids(&[load], 2000);
    let from_store = session.find_start_node_ids(&written, 2000);

    assert_eq!(through_load.ids, from_store.ids);
    assert!(through_load.contains(amount));
}

#[test]
fn literal_writes_are_reported_apart_from_start_nodes() {
    let mut t = Tracer::new("f");
    let slot = "keccak256_512(Concat(0,caller,0))";

    t.exec("CALLER", &[], "caller");
    let hash = t.exec("SHA3", &["Concat(0,caller,0)"], slot);
    let store = t.pre("SSTORE", &[slot, "1000"]);
    let load = t.exec("SLOAD", &[slot], "1000");

    let session = &mut t.session;
    assert_eq!(session.node(store).unwrap().slots[0].preds, vec![hash]);
    assert_eq!(session.node(load).unwrap().slots[1].preds, vec![store]);

    let written = session.node(store).unwrap().slots[1].preds.clone();
    let through_load = session.find_start_node_ids(&[load], 2000);
    let from_store = session.find_start_node_ids(&written, 2000);

    assert_eq!(through_load.ids, from_store.ids);
    assert!(through_load.ids.iter().all(|uid| session.is_start_node(*uid)));
    assert_eq!(
        through_load.literal_writes.into_iter().collect::<Vec<_>>(),
        vec![store]
    );
    assert!(!session.is_start_node(store));
}

#[test]
fn only_origin_nodes_are_start_nodes() {
    let mut t = transfer();
    let session = &mut t.tracer.session;
    let entry = session.sentinels("transfer(address,uint256)").unwrap().entry;

    assert!(session.is_start_node(t.amount));
    assert!(!session.is_start_node(t.debit));

    for store in [t.debit_store, t.credit_store] {
        for slot in 0..2 {
            let found = session.find_start_node_ids_for_slot(store, slot).unwrap();

            for uid in found.ids {
                let preds = session.node(uid).unwrap().predecessors();
                assert!(preds.is_empty() || preds == vec![entry], "{} has {:?}", uid, preds);
            }
        }
    }
}

#[test]
fn unresolved_masks_are_removed() {
    let mut t = Tracer::new("f");

    let mask = t.exec("AND", &["x", "0xff"], "x&0xff");
    let add = t.exec("ADD", &["x&0xff", "1"], "(x&0xff)+1");

    let session = &t.session;

    assert!(session.node(mask).unwrap().is_deleted());
    assert!(session.node(mask).unwrap().successors.is_empty());
    assert!(session.node(add).unwrap().predecessors().is_empty());
}

#[test]
fn half_resolved_masks_keep_their_resolved_operand() {
    let mut t = Tracer::new("f");

    let caller = t.exec("CALLER", &[], "caller");
    let mask = t.exec(
        "AND",
        &["caller", "0xffffffffffffffffffffffffffffffffffffffff"],
        "caller",
    );

    let node = t.session.node(mask).unwrap();

    assert_eq!(node.slots.len(), 1);
    assert_eq!(node.slots[0].preds, vec![caller]);
    assert_eq!(node.slots[0].value().expr, "caller");
}

fn loop_trace(back_jumps: usize, options: GraphOptions) -> (Tracer, usize) {
    let mut t = Tracer::with_options("f", options);

    t.pre_at(0x10, "JUMPI", &["0x40", "c"]);
    t.pre_at(0x40, "JUMPDEST", &[]);

    for _ in 0..back_jumps {
        t.pre_at(0x50, "JUMPI", &["0x40", "i<n"]);
        t.pre_at(0x40, "JUMPDEST", &[]);
    }

    let stop = t.pre_at(0x41, "STOP", &[]);

    (t, stop)
}

#[test]
fn destination_entered_twice_is_no_loop() {
    let (t, stop) = loop_trace(1, GraphOptions::default());
    let chain = t.session.block_leader_chain(stop).unwrap();

    assert!(!t.session.detect_path_loops(&chain), "{:?}", chain);
}

#[test]
fn destination_entered_three_times_is_a_loop() {
    let (t, stop) = loop_trace(2, GraphOptions::default());
    let chain = t.session.block_leader_chain(stop).unwrap();

    assert!(t.session.detect_path_loops(&chain), "{:?}", chain);

    let reports = t.session.detect_loops().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].terminal, stop);
    assert!(reports[0].span.map_or(false, |(lo, hi)| lo < hi && hi < stop));
}

#[test]
fn loop_threshold_is_configurable() {
    let options = GraphOptions {
        loop_threshold: 3,
        ..Default::default()
    };
    let (t, stop) = loop_trace(2, options);
    let chain = t.session.block_leader_chain(stop).unwrap();

    assert!(!t.session.detect_path_loops(&chain));
}
