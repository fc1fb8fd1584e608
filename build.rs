fn main() {
    let mut config = capnpc::CompilerCommand::new();
    config.file("proto/hll.capnp");
    config.file("proto/cpc.capnp");
    config.file("proto/kll.capnp");
    config.file("proto/frequent_items.capnp");
    config.file("proto/theta.capnp");

    config.run().expect("Cap'n Proto compilation failed");
}
