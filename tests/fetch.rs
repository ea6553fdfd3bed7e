mod common;

use std::io::Read;

use kira_geo_matrix::cache::{CacheState, cache_key};
use kira_geo_matrix::fetch::{ClosableRead, FetchOptions, FetchStream};

use common::Fixture;

const URL: &str = "https://ftp.example.org/geo/series/GSEnnn/GSE1/matrix/GSE1_series_matrix.txt";

fn body() -> Vec<u8> {
    (0..200_000u32)
        .map(|i| format!("line {i}\n"))
        .collect::<String>()
        .into_bytes()
}

fn read_all(stream: &mut FetchStream) -> Vec<u8> {
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    out
}

#[test]
fn cache_key_sanitizes_url() {
    assert_eq!(
        cache_key("https://host/acc.cgi?acc=GSE1&form=text"),
        "host_acc.cgi?acc_GSE1_form_text.cache"
    );
}

#[test]
fn second_read_is_served_from_cache() {
    let fixture = Fixture::new();
    fixture.transport.serve(URL, body());

    let mut first = fixture.repo.open(URL, FetchOptions::default()).unwrap();
    assert!(!first.is_cached());
    let first_bytes = read_all(&mut first);
    drop(first);
    assert_eq!(fixture.cache().state(URL), CacheState::Complete);

    let mut second = fixture.repo.open(URL, FetchOptions::default()).unwrap();
    assert!(second.is_cached());
    assert_eq!(read_all(&mut second), first_bytes);
    assert_eq!(first_bytes, body());
    assert_eq!(fixture.transport.request_count(URL), 1);
}

#[test]
fn close_is_idempotent() {
    let fixture = Fixture::new();
    fixture.transport.serve(URL, body());

    let mut stream = fixture.repo.open(URL, FetchOptions::default()).unwrap();
    read_all(&mut stream);
    assert_eq!(fixture.cache().state(URL), CacheState::Complete);
    stream.close().unwrap();
    stream.close().unwrap();
    assert_eq!(fixture.cache().state(URL), CacheState::Complete);
    assert!(!fixture.cache().temp_path(URL).exists());
}

#[test]
fn early_close_with_finalize_completes_entry() {
    let fixture = Fixture::new();
    fixture.transport.serve(URL, body());

    let mut stream = fixture.repo.open(URL, FetchOptions::default()).unwrap();
    let mut head = [0u8; 32];
    stream.read_exact(&mut head).unwrap();
    stream.close().unwrap();
    assert_eq!(fixture.cache().state(URL), CacheState::Complete);

    let mut cached = fixture.repo.open(URL, FetchOptions::default()).unwrap();
    assert!(cached.is_cached());
    assert_eq!(read_all(&mut cached), body());
}

#[test]
fn early_close_without_finalize_leaves_nothing() {
    let fixture = Fixture::new();
    fixture.transport.serve(URL, body());

    let mut stream = fixture.repo.open(URL, FetchOptions::partial()).unwrap();
    let mut head = [0u8; 32];
    stream.read_exact(&mut head).unwrap();
    assert_eq!(fixture.cache().state(URL), CacheState::Writing);
    stream.close().unwrap();
    assert_eq!(fixture.cache().state(URL), CacheState::Absent);
    assert!(!fixture.cache().temp_path(URL).exists());
    assert!(!fixture.cache().entry_path(URL).exists());
}

#[test]
fn dropped_stream_is_closed() {
    let fixture = Fixture::new();
    fixture.transport.serve(URL, body());

    let mut stream = fixture.repo.open(URL, FetchOptions::partial()).unwrap();
    let mut head = [0u8; 32];
    stream.read_exact(&mut head).unwrap();
    drop(stream);
    assert_eq!(fixture.cache().state(URL), CacheState::Absent);
}

#[test]
fn gzip_encoded_responses_are_decoded() {
    let fixture = Fixture::new();
    fixture.transport.serve_encoded(URL, b"^SERIES = GSE1\n");

    let mut stream = fixture.repo.open(URL, FetchOptions::default()).unwrap();
    assert_eq!(read_all(&mut stream), b"^SERIES = GSE1\n");
    drop(stream);

    let mut cached = fixture.repo.open(URL, FetchOptions::default()).unwrap();
    assert_eq!(read_all(&mut cached), b"^SERIES = GSE1\n");
}

#[test]
fn disabled_cache_always_hits_network() {
    let fixture = Fixture::with_settings(|settings| {
        settings.use_cache = false;
        settings.write_cache = false;
    });
    fixture.transport.serve(URL, body());

    for _ in 0..2 {
        let mut stream = fixture.repo.open(URL, FetchOptions::default()).unwrap();
        assert!(!stream.is_cached());
        read_all(&mut stream);
    }
    assert_eq!(fixture.transport.request_count(URL), 2);
    assert_eq!(fixture.cache().state(URL), CacheState::Absent);
}

#[test]
fn finalize_while_reporting_completes_entry() {
    let fixture = Fixture::with_settings(|settings| settings.report_progress = true);
    fixture.transport.serve(URL, body());

    let mut stream = fixture.repo.open(URL, FetchOptions::default()).unwrap();
    let mut head = [0u8; 32];
    stream.read_exact(&mut head).unwrap();
    stream.close().unwrap();
    assert_eq!(fixture.cache().state(URL), CacheState::Complete);
    assert!(!fixture.cache().temp_path(URL).exists());

    let mut cached = fixture.repo.open(URL, FetchOptions::default()).unwrap();
    assert!(cached.is_cached());
    assert_eq!(read_all(&mut cached), body());
    assert_eq!(fixture.transport.request_count(URL), 1);
}
