use yarrow::{Compiler, ScanFlags};

fn main() {
    // Compile rules
    let rules = Compiler::new()
        .add_source(
            r#"
            rule greeting : text {
                meta:
                    author = "Hilko Bengen"
                strings:
                    $a = "hello" fullword nocase
                condition:
                    $a
            }
            "#,
        )
        .expect("failed to parse rules")
        .compile()
        .expect("failed to compile rules");

    println!("{rules}");

    // Scan a buffer
    let matches = rules
        .scan_mem(b"well, Hello there", ScanFlags::empty(), None)
        .expect("scan failed");

    if matches.is_empty() {
        println!("No rule matched.");
    }
    for m in &matches {
        println!("Matched: {m}");
        for s in &m.strings {
            println!("  {} at {:#x}: {:?}", s.name, s.offset, String::from_utf8_lossy(&s.data));
        }
    }
}
