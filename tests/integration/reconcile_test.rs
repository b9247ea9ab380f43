use anyhow::Result;
use chrono::Duration;

use qiniu_autossl_lib::{
    core::types::{CertificateRecord, IssuanceUnit, Step},
    reconcile::{Pipeline, run_once},
    storage::CertificateStore,
};

use super::test_utils::{Harness, RecordingNotifier, hosts, now};

#[test]
fn new_parent_domain_is_issued_activated_and_recorded() -> Result<()> {
    let h = Harness::new(&["a.x.com", "b.x.com"]);

    let report = run_once(&h.context, now())?;

    assert_eq!(report.units, 1);
    assert_eq!(report.succeeded, 1);
    assert!(report.is_clean());

    let records = h.store.list_records()?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].parent_domain, "x.com");
    assert_eq!(records[0].cert_id, "C1");
    assert_eq!(records[0].domains, hosts(&["a.x.com", "b.x.com"]));
    assert!(h.events.any_starts_with("obtain *.x.com"));
    assert!(!h.events.any_starts_with("delete"));
    assert!(h.notifier.sent().is_empty());
    Ok(())
}

#[test]
fn expiring_certificate_is_replaced_then_retired() -> Result<()> {
    let h = Harness::new(&["a.x.com", "b.x.com"]);
    h.seed("x.com", "C0", &["a.x.com", "b.x.com"], now() + Duration::days(5));

    let report = run_once(&h.context, now())?;
    assert!(report.is_clean());

    assert!(h.events.any_starts_with("get C0"));
    assert!(h.events.any_starts_with("obtain *.x.com"));
    let last_bind = h
        .events
        .position("bind b.x.com C1")
        .expect("b.x.com bound to the new certificate");
    let retire = h.events.position("delete C0").expect("old certificate deleted");
    assert!(retire > last_bind);

    let record = h.store.find_by_parent_domain("x.com")?;
    assert_eq!(record.cert_id, "C1");
    assert_eq!(record.domains, hosts(&["a.x.com", "b.x.com"]));
    assert!(h.store.find_by_cert_id("C0").is_err());
    assert!(!h.cdn.has_certificate("C0"));
    Ok(())
}

#[test]
fn partial_activation_keeps_only_the_failing_hostname() -> Result<()> {
    let h = Harness::new(&["a.x.com", "b.x.com", "c.x.com"]);
    h.cdn.fail_binding("b.x.com");

    let mut unit = IssuanceUnit::new("x.com", hosts(&["a.x.com", "b.x.com", "c.x.com"]));
    Pipeline::new(&h.context, now()).run(&mut unit)?;

    assert_eq!(unit.hostnames, hosts(&["b.x.com"]));
    let record = h.store.find_by_parent_domain("x.com")?;
    assert_eq!(record.domains, hosts(&["a.x.com", "c.x.com"]));
    Ok(())
}

#[test]
fn failing_hostname_is_picked_up_by_a_later_pass() -> Result<()> {
    let h = Harness::new(&["a.x.com", "b.x.com"]);
    h.cdn.fail_binding("b.x.com");

    let first = run_once(&h.context, now())?;
    // Activation failures are not escalated.
    assert!(first.is_clean());
    assert!(h.notifier.sent().is_empty());
    assert_eq!(h.store.find_by_parent_domain("x.com")?.domains, hosts(&["a.x.com"]));

    h.cdn.heal_binding("b.x.com");
    h.events.clear();
    let second = run_once(&h.context, now())?;
    assert!(second.is_clean());

    assert_eq!(h.events.all(), vec!["get C1", "bind b.x.com C1"]);
    assert_eq!(
        h.store.find_by_parent_domain("x.com")?.domains,
        hosts(&["a.x.com", "b.x.com"])
    );
    Ok(())
}

#[test]
fn valid_certificate_skips_obtain_and_upload() -> Result<()> {
    let h = Harness::new(&["a.x.com", "b.x.com"]);
    h.seed("x.com", "C0", &["a.x.com"], now() + Duration::days(60));

    for _ in 0..2 {
        let mut unit = IssuanceUnit::new("x.com", hosts(&["a.x.com", "b.x.com"]));
        Pipeline::new(&h.context, now()).run(&mut unit)?;
        assert!(unit.hostnames.is_empty());
        assert_eq!(unit.current_cert_id, "C0");
    }

    assert!(!h.events.any_starts_with("obtain"));
    assert!(!h.events.any_starts_with("upload"));
    assert_eq!(
        h.store.find_by_cert_id("C0")?.domains,
        hosts(&["a.x.com", "b.x.com"])
    );
    Ok(())
}

#[test]
fn fully_covered_domains_produce_no_work() -> Result<()> {
    let h = Harness::new(&["a.x.com", "b.x.com"]);
    h.seed("x.com", "C0", &["a.x.com", "b.x.com"], now() + Duration::days(60));

    let report = run_once(&h.context, now())?;

    assert_eq!(report.units, 0);
    assert!(h.events.all().is_empty());
    Ok(())
}

#[test]
fn certificate_missing_from_provider_is_forgotten_and_reissued() -> Result<()> {
    let h = Harness::new(&["a.x.com"]);
    // The store points at a certificate the provider no longer has.
    h.store.create_record(&CertificateRecord {
        parent_domain: "x.com".to_string(),
        cert_id: "C0".to_string(),
        cert_pem: "old-cert".to_string(),
        key_pem: "old-key".to_string(),
        not_after: now() + Duration::days(60),
        domains: Vec::new(),
    })?;

    let report = run_once(&h.context, now())?;
    assert!(report.is_clean());

    assert!(h.events.any_starts_with("get C0"));
    assert!(h.events.any_starts_with("obtain *.x.com"));
    assert!(!h.events.any_starts_with("delete"));
    assert!(h.store.find_by_cert_id("C0").is_err());
    assert_eq!(h.store.find_by_parent_domain("x.com")?.cert_id, "C1");
    Ok(())
}

#[test]
fn every_failing_unit_gets_its_own_retry() -> Result<()> {
    let h = Harness::new(&["a.x.com", "a.y.com"]);
    h.authority.fail_next(2);

    let report = run_once(&h.context, now())?;

    assert_eq!(report.units, 2);
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.recovered, 2);
    assert!(report.is_clean());
    assert_eq!(h.store.list_records()?.len(), 2);
    assert!(h.notifier.sent().is_empty());
    Ok(())
}

#[test]
fn failures_surviving_the_retry_are_alerted_together() -> Result<()> {
    let h = Harness::new(&["a.x.com", "a.y.com"]);
    h.authority.fail_next(4);

    let report = run_once(&h.context, now())?;

    assert_eq!(report.succeeded, 0);
    assert_eq!(report.recovered, 0);
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures.iter().all(|f| f.step == Step::Obtain));
    assert_eq!(report.failures[0].hostnames, hosts(&["a.x.com"]));

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "[autossl] 2 certificate task(s) failed");
    assert!(sent[0].text.contains("a.x.com"));
    assert!(sent[0].text.contains("did not propagate"));
    Ok(())
}

#[test]
fn unreachable_provider_skips_the_pass_with_an_alert() {
    let h = Harness::new(&["a.x.com"]);
    h.cdn.fail_listing();

    assert!(run_once(&h.context, now()).is_err());

    assert!(h.events.all().is_empty());
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.contains("skipped"));
    assert!(sent[0].text.contains("domain list unavailable"));
}

#[test]
fn alert_delivery_failure_does_not_fail_the_pass() -> Result<()> {
    let h = Harness::with_notifier(&["a.x.com"], RecordingNotifier::broken());
    h.authority.fail_next(2);

    let report = run_once(&h.context, now())?;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(h.notifier.sent().len(), 1);
    Ok(())
}

#[test]
fn retry_after_a_failed_store_write_records_every_activation() -> Result<()> {
    let h = Harness::new(&["a.x.com", "b.x.com"]);
    h.faults.fail_creates(1);

    let report = run_once(&h.context, now())?;

    assert_eq!(report.recovered, 1);
    assert!(report.is_clean());
    let record = h.store.find_by_parent_domain("x.com")?;
    assert_eq!(record.cert_id, "C1");
    assert_eq!(record.domains, hosts(&["a.x.com", "b.x.com"]));
    // The retry resumes at activation, so nothing is issued twice.
    assert_eq!(h.events.all().iter().filter(|e| e.starts_with("obtain")).count(), 1);
    Ok(())
}
