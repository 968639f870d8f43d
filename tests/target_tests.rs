use std::net::Ipv4Addr;

use scan_orchestrator::target::{ipv4_to_default_cidr, Target};
use scan_orchestrator::ErrorKind;

#[test]
fn default_cidr_is_24() {
    let cidr = ipv4_to_default_cidr(Ipv4Addr::new(192, 168, 42, 99));
    assert_eq!(cidr.to_string(), "192.168.42.0/24");
}

#[test]
fn accepted_target_forms() {
    assert_eq!(Target::parse("10.0.0.5").unwrap(), Target::Ipv4(Ipv4Addr::new(10, 0, 0, 5)));
    assert_eq!(Target::parse("10.0.0.5").unwrap().describe(), "10.0.0.5 (host)");
    assert_eq!(
        Target::parse("172.16.4.9/30").unwrap().describe(),
        "172.16.4.8/30 (network, 2 hosts)"
    );
    assert_eq!(
        Target::parse("Intranet-01.Corp.example").unwrap().describe(),
        "intranet-01.corp.example (hostname)"
    );
    assert_eq!(Target::parse("localhost").unwrap().to_string(), "localhost");
}

#[test]
fn rejected_targets_are_invalid_input() {
    for bad in ["10.0.0.0/-1", "::1", "fe80::/64", "-iL targets.txt", "-host.example", "a.b.123"] {
        let err = Target::parse(bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput, "{bad:?}");
    }
}
