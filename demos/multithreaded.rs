use std::sync::Arc;
use std::thread;
use std::time::Duration;

use yarrow::{Rules, ScanFlags};

fn main() {
    let rules = Arc::new(
        Rules::compile(
            r#"
            rule mz { strings: $mz = { 4D 5A } condition: $mz at 0 }
            rule hello { strings: $h = "hello" nocase condition: $h }
            "#,
        )
        .expect("failed to compile rules"),
    );

    let inputs: [&'static [u8]; 4] = [b"MZ\x90\x00", b"HELLO world", b"MZ hello", b"nothing"];

    let handles: Vec<_> = inputs
        .into_iter()
        .enumerate()
        .map(|(i, input)| {
            let rs = Arc::clone(&rules);
            thread::spawn(move || {
                // Compiled rules are shared; each scan has its own state.
                let result = rs.scan_mem(input, ScanFlags::FAST_MODE, Some(Duration::from_secs(1)));
                match result {
                    Ok(matches) => {
                        let names: Vec<&str> = matches.iter().map(|m| m.rule.as_str()).collect();
                        println!("Thread {i}: {names:?}");
                    }
                    Err(e) => println!("Thread {i}: {e}"),
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}
