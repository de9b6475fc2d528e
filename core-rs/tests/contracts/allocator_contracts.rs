// Port Allocator Contract Tests
//
// These tests verify INVARIANTS that MUST NEVER BREAK regardless of
// implementation: the allocator is deterministic, strictly ascending,
// and never hands the same port to two conflicts in one run.

use dcp_core::{allocate, build_plan, classify, extract, ComposeFile, DcpError, EnvironmentMap,
    OccupancyRecord, PortProbe, PortRange, Protocol};
use std::collections::{BTreeSet, HashSet};

/// Deterministic probe with a fixed occupied set
struct StubProbe {
    occupied: HashSet<u16>,
}

impl StubProbe {
    fn new(occupied: &[u16]) -> Self {
        StubProbe {
            occupied: occupied.iter().copied().collect(),
        }
    }
}

impl PortProbe for StubProbe {
    fn probe(&self, port: u16, _protocol: Protocol) -> OccupancyRecord {
        OccupancyRecord {
            in_use: self.occupied.contains(&port),
            process: None,
            container: None,
        }
    }
}

fn reserved(ports: &[u16]) -> BTreeSet<u16> {
    ports.iter().copied().collect()
}

/// WHY: The scan starts at range.low and moves strictly upward.
/// BREAKS: Reassignments stop being reproducible across runs; two runs
/// against the same snapshot would disagree about the chosen port.
#[test]
fn allocator_picks_first_free_unreserved_candidate() {
    let range = PortRange::new(8000, 8003).unwrap();
    let probe = StubProbe::new(&[]);

    let port = allocate(8080, &range, &reserved(&[8000, 8001]), &probe, Protocol::Tcp).unwrap();
    assert_eq!(port, 8002);
}

/// WHY: Occupied candidates are rejected even when unreserved.
#[test]
fn allocator_skips_occupied_candidates() {
    let range = PortRange::new(8000, 8003).unwrap();
    let probe = StubProbe::new(&[8002]);

    let port = allocate(8080, &range, &reserved(&[8000, 8001]), &probe, Protocol::Tcp).unwrap();
    assert_eq!(port, 8003);
}

/// WHY: Exhaustion is an error, never a silent fallback outside the range.
#[test]
fn allocator_reports_exhaustion() {
    let range = PortRange::new(8000, 8001).unwrap();
    let probe = StubProbe::new(&[]);

    let result = allocate(8080, &range, &reserved(&[8000, 8001]), &probe, Protocol::Tcp);
    assert!(matches!(result, Err(DcpError::NoAvailablePort(_))));
}

/// WHY: The allocator is stateless; identical inputs give identical output.
/// BREAKS: Interactive suggestions would drift from auto-mode choices.
#[test]
fn allocator_is_deterministic_across_invocations() {
    let range = PortRange::new(8000, 9000).unwrap();
    let probe = StubProbe::new(&[8000, 8002]);
    let res = reserved(&[8001]);

    let results: Vec<u16> = (0..5)
        .map(|_| allocate(80, &range, &res, &probe, Protocol::Tcp).unwrap())
        .collect();
    assert!(results.iter().all(|&p| p == 8003));
}

/// WHY: Every declared host port is reserved, including ports handed out
/// earlier in the same plan.
/// BREAKS: Two conflicting services would both be moved onto the same
/// port and the "fixed" file would still race at startup.
#[test]
fn plan_never_double_allocates() {
    let text = "\
services:
  a:
    ports:
      - \"8080:80\"
  b:
    ports:
      - \"9090:90\"
  c:
    ports:
      - \"7070:70\"
";
    let compose = ComposeFile::from_str(text).unwrap();
    let specs = extract(&compose, &EnvironmentMap::default()).unwrap();
    let probe = StubProbe::new(&[8080, 9090, 7070]);
    let entries = classify(&specs, &probe);

    let range = PortRange::new(8000, 8100).unwrap();
    let plan = build_plan(&entries, &range, &probe, None);

    assert_eq!(plan.entries.len(), 3);
    let mut assigned: Vec<u16> = plan.entries.iter().map(|e| e.new_port).collect();
    assigned.sort_unstable();
    assigned.dedup();
    assert_eq!(assigned.len(), 3, "a new port was assigned twice");
}

/// WHY: A new port may not collide with any port declared elsewhere in
/// the document, even an available one.
#[test]
fn plan_respects_declared_ports_of_other_services() {
    let text = "\
services:
  busy:
    ports:
      - \"8000:80\"
  conflicted:
    ports:
      - \"9090:90\"
";
    let compose = ComposeFile::from_str(text).unwrap();
    let specs = extract(&compose, &EnvironmentMap::default()).unwrap();
    let probe = StubProbe::new(&[9090]);
    let entries = classify(&specs, &probe);

    let range = PortRange::new(8000, 8100).unwrap();
    let plan = build_plan(&entries, &range, &probe, None);

    assert_eq!(plan.entries.len(), 1);
    // 8000 is declared by `busy` and free, but must still be skipped
    assert_eq!(plan.entries[0].new_port, 8001);
}

/// WHY: Exhaustion on one binding must not abort the others.
#[test]
fn exhaustion_is_recorded_per_binding() {
    let text = "\
services:
  a:
    ports:
      - \"8080:80\"
  b:
    ports:
      - \"9090:90\"
";
    let compose = ComposeFile::from_str(text).unwrap();
    let specs = extract(&compose, &EnvironmentMap::default()).unwrap();
    let probe = StubProbe::new(&[8080, 9090, 8001]);
    let entries = classify(&specs, &probe);

    // Exactly one free candidate: the first conflict takes it, the
    // second records a failure
    let range = PortRange::new(8000, 8001).unwrap();
    let plan = build_plan(&entries, &range, &probe, None);

    assert_eq!(plan.entries.len(), 1);
    assert_eq!(plan.entries[0].new_port, 8000);
    assert_eq!(plan.failures.len(), 1);
    assert_eq!(plan.failures[0].service, "b");
}
