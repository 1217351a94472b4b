//! Reconfiguration from configuration and plan files on disk.

use flexbm::{ObjectKind, P4Objects, Packet, ReconfigResult, Switch};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::path::PathBuf;

fn data(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

fn router() -> Switch {
    let switch = Switch::new(2);
    switch.init_objects(0, data("simple_router.json")).unwrap();
    switch
        .table_add_entry(
            0,
            "ingress",
            "MyIngress.ipv4_exact",
            vec![0x0a00_0001],
            "MyIngress.forward",
            vec![2],
        )
        .unwrap();
    switch
}

fn tcp_packet() -> Packet {
    Packet::new(0)
        .with_header("ipv4")
        .with_field("ipv4.dstAddr", 0x0a00_0001)
        .with_field("ipv4.protocol", 0x06)
}

#[test]
fn test_load_router_document() {
    let objects = P4Objects::from_path(data("simple_router.json")).unwrap();
    assert_eq!(objects.object_count(ObjectKind::Pipeline), 1);
    assert_eq!(objects.object_count(ObjectKind::Table), 1);
    assert_eq!(objects.object_count(ObjectKind::Conditional), 1);
    assert_eq!(objects.object_count(ObjectKind::Action), 4);
    assert_eq!(objects.next_free_id(ObjectKind::Action), 4);

    let original: Value =
        serde_json::from_str(&std::fs::read_to_string(data("simple_router.json")).unwrap())
            .unwrap();
    let cfg = objects.cfg();
    assert_eq!(cfg["__meta__"], original["__meta__"]);
    assert_eq!(cfg["register_arrays"], original["register_arrays"]);
    assert_eq!(
        cfg["pipelines"][0]["tables"][0]["max_size"],
        json!(1024)
    );
}

#[test]
fn test_plan_file_inserts_marking_stage() {
    let switch = router();
    let before = switch.process_packet(0, tcp_packet()).unwrap();
    assert_eq!(before.packet.field("ipv4.diffserv"), 0);
    assert_eq!(before.packet.field("meta.egress_spec"), 2);

    let code = switch.apply_reconfig(0, data("simple_router_tos.json"), data("mark_tcp_tos.plan"));
    assert_eq!(code, ReconfigResult::Success);

    let active = switch.active(0).unwrap();
    let objects = active.objects();
    let node_3 = objects
        .json_value(ObjectKind::Conditional, Some("ingress"), "node_3")
        .unwrap();
    assert_eq!(node_3["id"], json!(1));
    assert_eq!(node_3["true_next"], json!("MyIngress.mark_tos"));
    assert_eq!(node_3["source_info"]["line"], json!(58));
    let mark = objects
        .json_value(ObjectKind::Table, Some("ingress"), "MyIngress.mark_tos")
        .unwrap();
    assert_eq!(mark["id"], json!(1));
    assert_eq!(mark["action_ids"], json!([4]));

    let after = switch.process_packet(0, tcp_packet()).unwrap();
    assert_eq!(after.packet.field("ipv4.diffserv"), 0x2e);
    let udp = switch
        .process_packet(0, tcp_packet().with_field("ipv4.protocol", 0x11))
        .unwrap();
    assert_eq!(udp.packet.field("ipv4.diffserv"), 0);

    // Both packets and the one before the plan hit the forward action
    assert_eq!(switch.register_read(0, "port_hits", 2).unwrap(), 3);

    // The other context is untouched
    assert_eq!(switch.generation(1).unwrap(), 0);
    assert_eq!(
        switch
            .active(1)
            .unwrap()
            .objects()
            .object_count(ObjectKind::Pipeline),
        0
    );
}

#[test]
fn test_reconfigured_document_reloads() {
    let switch = router();
    let code = switch.apply_reconfig(0, data("simple_router_tos.json"), data("mark_tcp_tos.plan"));
    assert_eq!(code, ReconfigResult::Success);

    let cfg = switch.active(0).unwrap().objects().cfg();
    let reloaded = Switch::new(1);
    reloaded
        .init_objects_from_reader(0, cfg.to_string().as_bytes())
        .unwrap();
    assert_eq!(reloaded.active(0).unwrap().objects().cfg(), cfg);
}

#[test]
fn test_missing_inputs() {
    let switch = router();
    assert_eq!(
        switch.apply_reconfig(0, data("absent.json"), data("mark_tcp_tos.plan")),
        ReconfigResult::OpenJsonFileFail
    );
    assert_eq!(
        switch.apply_reconfig(0, data("simple_router_tos.json"), data("absent.plan")),
        ReconfigResult::OpenPlanFileFail
    );
    assert_eq!(switch.generation(0).unwrap(), 1);
}
