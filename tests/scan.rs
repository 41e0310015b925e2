use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::time::Duration;

use yarrow::{Compiler, MetaValue, Rules, ScanError, ScanFlags};

const TEST_RULE: &str = r#"rule test : tag1 {
    meta: author = "Hilko Bengen"
    strings: $a = "abc" fullword
    condition: $a
}"#;

fn make_rules(source: &str) -> Rules {
    Compiler::new()
        .add_source(source)
        .unwrap()
        .compile()
        .unwrap()
}

fn assert_true_rules(rules: &[&str], data: &[u8]) {
    for rule in rules {
        let matches = make_rules(rule)
            .scan_mem(data, ScanFlags::empty(), None)
            .unwrap();
        assert!(!matches.is_empty(), "rule < {rule} > did not match {data:?}");
    }
}

fn assert_false_rules(rules: &[&str], data: &[u8]) {
    for rule in rules {
        let matches = make_rules(rule)
            .scan_mem(data, ScanFlags::empty(), None)
            .unwrap();
        assert!(matches.is_empty(), "rule < {rule} > matched {data:?}");
    }
}

// ---------------------------------------------------------------------------
// Scan sources
// ---------------------------------------------------------------------------

#[test]
fn simple_match() {
    let rules = make_rules(TEST_RULE);
    let matches = rules.scan_mem(b" abc ", ScanFlags::empty(), None).unwrap();
    assert_eq!(matches.len(), 1);

    let m = &matches[0];
    assert_eq!(m.rule, "test");
    assert_eq!(m.namespace, "default");
    assert_eq!(m.tags, vec!["tag1"]);
    assert_eq!(
        m.metadata.get("author"),
        Some(&MetaValue::Text("Hilko Bengen".into()))
    );
    assert_eq!(m.strings.len(), 1);
    assert_eq!(m.strings[0].name, "$a");
    assert_eq!(m.strings[0].offset, 1);
    assert_eq!(m.strings[0].data, b"abc");
    assert_eq!(m.to_string(), "default:test [tag1]");

    assert!(rules.scan_mem(b"xyz", ScanFlags::empty(), None).unwrap().is_empty());
}

#[test]
fn simple_file_match() {
    let rules = make_rules(TEST_RULE);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b" abc ").unwrap();
    file.flush().unwrap();

    let matches = rules
        .scan_file(file.path(), ScanFlags::empty(), None)
        .unwrap();
    assert_eq!(matches.len(), 1);
}

#[test]
fn missing_file_is_an_open_error() {
    let rules = make_rules(TEST_RULE);
    let dir = tempfile::tempdir().unwrap();
    let err = rules
        .scan_file(dir.path().join("absent"), ScanFlags::empty(), None)
        .unwrap_err();
    assert!(matches!(err, ScanError::Open { .. }));
}

#[test]
fn file_handle_scans_from_start() {
    let rules = make_rules(TEST_RULE);
    let mut file: File = tempfile::tempfile().unwrap();
    file.write_all(b" abc ").unwrap();
    // Cursor is left at the end on purpose.
    assert_eq!(file.stream_position().unwrap(), 5);

    let matches = rules
        .scan_file_handle(&file, ScanFlags::empty(), None)
        .unwrap();
    assert_eq!(matches.len(), 1);

    file.seek(SeekFrom::Start(2)).unwrap();
    let matches = rules
        .scan_file_handle(&file, ScanFlags::empty(), None)
        .unwrap();
    assert_eq!(matches.len(), 1);
}

#[test]
fn reader_is_drained() {
    let rules = make_rules(TEST_RULE);
    let matches = rules
        .scan_reader(&b"xx abc xx"[..], ScanFlags::empty(), None)
        .unwrap();
    assert_eq!(matches[0].strings[0].offset, 3);
}

#[test]
fn empty_input() {
    let rules = make_rules("rule test { condition: true }");
    let matches = rules.scan_mem(&[], ScanFlags::empty(), None).unwrap();
    // `true` holds on empty input too.
    assert_eq!(matches.len(), 1);

    let rules = make_rules(TEST_RULE);
    assert!(rules.scan_mem(&[], ScanFlags::empty(), None).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Matching semantics
// ---------------------------------------------------------------------------

#[test]
fn text_strings() {
    assert_true_rules(
        &[
            r#"rule t { strings: $a = "abc" condition: $a }"#,
            r#"rule t { strings: $a = "ABC" nocase condition: $a }"#,
            r#"rule t { strings: $a = "abc" fullword condition: $a }"#,
            r#"rule t { strings: $a = "ab" condition: #a == 2 }"#,
            r#"rule t { strings: $a = "abc" condition: $a at 1 }"#,
            r#"rule t { strings: $a = "abc" condition: $a in (0..2) }"#,
            r#"rule t { strings: $a = "zzz" condition: not $a }"#,
        ],
        b" abc ab ",
    );
    assert_false_rules(
        &[
            r#"rule t { strings: $a = "ABC" condition: $a }"#,
            r#"rule t { strings: $a = "bc" fullword condition: $a }"#,
            r#"rule t { strings: $a = "abc" condition: $a at 0 }"#,
            r#"rule t { strings: $a = "abc" condition: $a in (2..10) }"#,
            r#"rule t { strings: $a = "abc" wide condition: $a }"#,
        ],
        b" abc ab ",
    );
}

#[test]
fn wide_strings() {
    let data = b"\0a\0b\0c\0\0";
    assert_true_rules(
        &[
            r#"rule t { strings: $a = "abc" wide condition: $a }"#,
            r#"rule t { strings: $a = "ABC" wide nocase condition: $a }"#,
            r#"rule t { strings: $a = "abc" wide fullword condition: $a }"#,
        ],
        &data[1..],
    );
    assert_false_rules(
        &[r#"rule t { strings: $a = "abc" ascii condition: $a }"#],
        &data[1..],
    );
}

#[test]
fn hex_strings() {
    let data = b"MZ\x90\x00\x03\x00PE\x00\x00";
    assert_true_rules(
        &[
            "rule t { strings: $h = { 4D 5A } condition: $h at 0 }",
            "rule t { strings: $h = { 4D 5A ?? 00 } condition: $h }",
            "rule t { strings: $h = { 4D 5A [2-4] 00 } condition: $h }",
            "rule t { strings: $h = { 4D ( 5A | 5B ) 9? } condition: $h }",
            "rule t { strings: $h = { 4D 5A [-] 50 45 } condition: $h }",
        ],
        data,
    );
    assert_false_rules(
        &[
            "rule t { strings: $h = { 4D 5B } condition: $h }",
            "rule t { strings: $h = { 4D 5A [5] 50 } condition: $h }",
            "rule t { strings: $h = { 4D ( 00 | 01 ) } condition: $h }",
        ],
        data,
    );
}

#[test]
fn regex_strings() {
    assert_true_rules(
        &[
            "rule t { strings: $r = /ab+c/ condition: $r }",
            "rule t { strings: $r = /AB+C/i condition: $r }",
            r"rule t { strings: $r = /a.c/s condition: $r }",
            r"rule t { strings: $r = /\x00\xff/ condition: $r }",
        ],
        b"xxabbbc a\nc \x00\xff",
    );
    assert_false_rules(
        &[
            "rule t { strings: $r = /AB+C/ condition: $r }",
            "rule t { strings: $r = /a.c/ condition: $r and #r == 2 }",
        ],
        b"xxabbbc a\nc",
    );
}

#[test]
fn conditions() {
    assert_true_rules(
        &[
            "rule t { condition: filesize == 5 }",
            r#"rule t { strings: $a = "a" $b = "b" $c = "z" condition: 2 of them }"#,
            r#"rule t { strings: $a = "a" $b = "b" condition: all of ($a, $b) }"#,
            r#"rule t { strings: $x1 = "a" $x2 = "z" condition: any of ($x*) }"#,
            r#"rule t { strings: $a = "z" condition: none of them }"#,
            "rule a { condition: true } rule t { condition: a }",
            r#"rule t { strings: $a = "a" condition: #a >= 1 and filesize < 100 or false }"#,
            r#"rule t { strings: $_unused = "q" condition: true }"#,
        ],
        b"abcde",
    );
    assert_false_rules(
        &[
            "rule t { condition: filesize > 5 }",
            r#"rule t { strings: $a = "a" $b = "z" condition: all of them }"#,
            r#"rule t { strings: $a = "a" condition: none of them }"#,
            r#"rule t { condition: "a" == 1 }"#,
        ],
        b"abcde",
    );
}

#[test]
fn global_rules_gate_their_namespace() {
    let rules = Compiler::new()
        .add_source(
            r#"
            global rule big_enough { condition: filesize > 3 }
            rule has_a { strings: $a = "a" condition: $a }
            "#,
        )
        .unwrap()
        .add_source_in_namespace("other", r#"rule also_a { strings: $a = "a" condition: $a }"#)
        .unwrap()
        .compile()
        .unwrap();

    let names = |data: &[u8]| -> Vec<String> {
        rules
            .scan_mem(data, ScanFlags::empty(), None)
            .unwrap()
            .into_iter()
            .map(|m| format!("{}:{}", m.namespace, m.rule))
            .collect()
    };
    assert_eq!(
        names(b"aaaa"),
        vec!["default:big_enough", "default:has_a", "other:also_a"]
    );
    assert_eq!(names(b"a"), vec!["other:also_a"]);
}

// ---------------------------------------------------------------------------
// Flags and timeout
// ---------------------------------------------------------------------------

#[test]
fn fast_mode_limits_presence_only_strings() {
    let rules = make_rules(
        r#"
        rule presence { strings: $a = "ab" condition: $a }
        rule counted { strings: $b = "ab" condition: #b == 3 }
        "#,
    );
    let data = b"ab ab ab";

    let full = rules.scan_mem(data, ScanFlags::empty(), None).unwrap();
    assert_eq!(full.len(), 2);
    assert_eq!(full[0].strings.len(), 3);

    let fast = rules.scan_mem(data, ScanFlags::FAST_MODE, None).unwrap();
    assert_eq!(fast.len(), 2);
    assert_eq!(fast[0].strings.len(), 1);
    assert_eq!(fast[1].strings.len(), 3);
}

#[test]
fn zero_timeout_is_a_timeout_not_an_empty_result() {
    let rules = make_rules(TEST_RULE);
    let err = rules
        .scan_mem(b" abc ", ScanFlags::empty(), Some(Duration::ZERO))
        .unwrap_err();
    assert!(matches!(err, ScanError::Timeout { .. }));
}

#[test]
fn generous_timeout_completes() {
    let rules = make_rules(TEST_RULE);
    let matches = rules
        .scan_mem(b" abc ", ScanFlags::empty(), Some(Duration::from_secs(60)))
        .unwrap();
    assert_eq!(matches.len(), 1);
}

#[test]
fn offsets_are_reported_in_order() {
    let rules = make_rules(r#"rule t { strings: $a = "aa" $b = "b" condition: $a and $b }"#);
    let matches = rules.scan_mem(b"aaab", ScanFlags::empty(), None).unwrap();
    let found: Vec<(&str, u64)> = matches[0]
        .strings
        .iter()
        .map(|s| (s.name.as_str(), s.offset))
        .collect();
    assert_eq!(found, vec![("$a", 0), ("$a", 1), ("$b", 3)]);
}
