mod utils;

use tokenflow::graph::NodeType;
use utils::transfer;

#[test]
fn balance_slots_are_linked_to_their_hashes() {
    let t = transfer();
    let session = &t.tracer.session;

    let debit_store = session.node(t.debit_store).unwrap();
    let credit_store = session.node(t.credit_store).unwrap();

    assert_eq!(debit_store.slots[0].preds, vec![t.from_slot]);
    assert_eq!(credit_store.slots[0].preds, vec![t.to_slot]);
    assert_eq!(
        session.node(t.from_slot).unwrap().slots[0].preds,
        vec![t.caller],
        "sender balance is keyed by the caller"
    );
    assert_eq!(
        session.node(t.to_slot).unwrap().slots[0].preds,
        vec![t.to],
        "recipient balance is keyed by the first parameter"
    );
}

#[test]
fn stored_balances_originate_from_sender_and_parameters() {
    let mut t = transfer();
    let session = &mut t.tracer.session;

    let debit = session.find_start_node_ids_for_slot(t.debit_store, 1).unwrap();
    let credit = session.find_start_node_ids_for_slot(t.credit_store, 1).unwrap();

    assert!(debit.contains(t.caller), "{:?}", debit);
    assert!(debit.contains(t.amount), "{:?}", debit);
    assert!(!debit.contains(t.to), "{:?}", debit);
    assert_eq!(debit.sha3_count, 1);
    assert_eq!(debit.sload_count, 1);

    assert!(credit.contains(t.to), "{:?}", credit);
    assert!(credit.contains(t.amount), "{:?}", credit);
    assert!(!credit.contains(t.caller), "{:?}", credit);

    assert!(!debit.exhausted && !credit.exhausted);
}

#[test]
fn slot_origins_pass_through_the_hashes() {
    let mut t = transfer();
    let session = &mut t.tracer.session;

    let from = session.find_start_node_ids_for_slot(t.debit_store, 0).unwrap();
    let to = session.find_start_node_ids_for_slot(t.credit_store, 0).unwrap();

    assert_eq!(from.ids.iter().copied().collect::<Vec<_>>(), vec![t.caller]);
    assert_eq!(to.ids.iter().copied().collect::<Vec<_>>(), vec![t.to]);
    assert_eq!(from.sha3_count, 1);
}

#[test]
fn transfer_has_no_anomalies() {
    let t = transfer();
    let session = &t.tracer.session;

    assert!(session.anomalies().is_empty(), "{:?}", session.anomalies());
    assert_eq!(session.missing_predecessors(t.debit_store), Ok(vec![]));
    assert_eq!(session.missing_predecessors(t.credit_store), Ok(vec![]));
}

#[test]
fn arithmetic_links_balance_reads_and_amount() {
    let t = transfer();
    let session = &t.tracer.session;

    let debit = session.get_node(t.debit).unwrap();
    let credit = session.get_node(t.credit).unwrap();

    assert_eq!(debit.predecessors, vec![vec![t.from_balance], vec![t.amount]]);
    assert_eq!(credit.predecessors, vec![vec![t.to_balance], vec![t.amount]]);
    assert_eq!(debit.node_type, NodeType::DataFlow);
}

#[test]
fn straight_line_transfer_has_one_path_without_loops() {
    let t = transfer();
    let session = &t.tracer.session;
    let function = "transfer(address,uint256)";

    let paths = session.get_all_paths(function).unwrap();
    let path = paths.get(&t.stop).expect("stop terminates a path");
    let entry = session.sentinels(function).unwrap().entry;

    assert_eq!(paths.len(), 1);
    assert_eq!(path.first(), Some(&entry));
    assert_eq!(path.last(), Some(&t.stop));
    assert!(path.contains(&t.debit_store) && path.contains(&t.credit_store));
    assert!(session.detect_loops().unwrap().iter().all(|r| !r.is_loop()));
}
