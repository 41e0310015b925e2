//! Compile once, cache the compiled rules on disk and reuse them.

use std::path::PathBuf;
use std::time::Instant;

use yarrow::{Compiler, Rules, ScanFlags};

const SOURCE: &str = r#"
rule mz_header : pe { strings: $mz = { 4D 5A } condition: $mz at 0 }
rule packed : pe { strings: $upx = "UPX!" condition: mz_header and $upx }
"#;

fn main() {
    let cache: PathBuf = std::env::temp_dir().join("yarrow-demo.yrw");

    let rules = match Rules::load(&cache) {
        Ok(rules) => {
            println!("loaded {rules} from {}", cache.display());
            rules
        }
        Err(e) => {
            println!("cache unusable ({e}), compiling");
            let start = Instant::now();
            let rules = Compiler::new()
                .add_source(SOURCE)
                .expect("failed to parse rules")
                .compile()
                .expect("failed to compile rules");
            println!("compiled in {:?}", start.elapsed());
            rules.save(&cache).expect("failed to write cache");
            rules
        }
    };

    let sample = b"MZ\x90\x00....UPX!....";
    for m in rules
        .scan_mem(sample, ScanFlags::empty(), None)
        .expect("scan failed")
    {
        println!("Matched: {m}");
    }
}
