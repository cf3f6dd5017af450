//! Shared fixture for the pipeline integration tests.
//!
//! The engine is exercised against small stand-ins for the external tools:
//! `flac` copies bytes (so decode is byte-identical), `par2` writes stub
//! volumes and verifies they are non-empty, `xdelta3` compares its stdin
//! against the base file and emits canned printdelta output, and the
//! speech-to-text command prints a fixed talkytime token stream. The
//! stand-in encoder corrupts its output when a `<source>.corrupt` marker
//! exists, which makes the cross-check fail exactly like a flaky medium.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use taketake::{Config, Engine, RunReport, ScriptedPrompter};
use tempfile::TempDir;

pub const SPOKEN: &str =
    "ten forty four and zero zero seconds saturday november sixth twenty twenty one";

/// The name the fixture's token stream guesses for `audio001.wav` with a
/// 0.2 s recording.
pub const GUESS_001: &str = "piano.20211106-104400-Sat.0s.audio001";

pub struct Fixture {
    pub tmp: TempDir,
    pub src: PathBuf,
    pub dest: PathBuf,
    bins: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dest = tmp.path().join("dest");
        let bins = tmp.path().join("bins");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::create_dir_all(&bins).unwrap();

        write_script(
            &bins.join("stt"),
            &format!("cat >/dev/null\necho \"{SPOKEN}\"\n"),
        );

        write_script(
            &bins.join("flac"),
            r#"if [ "$1" = "-c" ] && [ "$2" = "-d" ]; then
    cat "$3"
else
    cp "$1" "$3"
    if [ -f "$1.corrupt" ]; then printf 'X' >> "$3"; fi
fi
"#,
        );

        write_script(
            &bins.join("par2"),
            r#"cmd="$1"; shift
file=""
for a in "$@"; do
    case "$a" in
        -*) ;;
        *) file="$a" ;;
    esac
done
case "$cmd" in
    create)
        printf 'parity' > "$file.vol00+01.par2"
        printf 'parity' > "$file.vol01+01.par2"
        printf 'base' > "$file.par2"
        ;;
    verify)
        [ -s "$file" ] || exit 1
        ;;
    *)
        exit 2
        ;;
esac
"#,
        );

        write_script(
            &bins.join("xdelta3"),
            r#"if [ "$1" = "printdelta" ]; then
    cat "$2"
    exit 0
fi
base="$2"
tmp="${TMPDIR:-/tmp}/xdelta-fake.$$"
cat > "$tmp"
size=$(wc -c < "$base" | tr -d ' ')
tsize=$(wc -c < "$tmp" | tr -d ' ')
if cmp -s "$base" "$tmp"; then
    printf 'VCDIFF header indicator:      VCD_APPHEADER\n'
    printf 'VCDIFF copy window length:    %s\n' "$size"
    printf 'VCDIFF copy window offset:    0\n'
    printf 'VCDIFF target window length:  %s\n' "$size"
    printf 'VCDIFF data section length:   0\n'
    printf '  Offset Code Type1 Size1 @Addr1 + Type2 Size2 @Addr2\n'
    printf '  000000 019  CPY_0 %s @0\n' "$size"
    printf '\n'
else
    printf 'VCDIFF header indicator:      VCD_APPHEADER\n'
    printf 'VCDIFF copy window length:    %s\n' "$size"
    printf 'VCDIFF copy window offset:    0\n'
    printf 'VCDIFF target window length:  %s\n' "$tsize"
    printf 'VCDIFF data section length:   42\n'
    printf '  Offset Code Type1 Size1 @Addr1 + Type2 Size2 @Addr2\n'
    printf '  000000 019  CPY_0 %s @0\n' "$size"
    printf '  000100 001  ADD_1 42 @0\n'
    printf '\n'
fi
rm -f "$tmp"
"#,
        );

        Self {
            tmp,
            src,
            dest,
            bins,
        }
    }

    /// Write a mono 8 kHz test wav with the given number of samples
    /// (1600 samples = 0.2 s, which formats as a `0s` runtime).
    pub fn write_wav(&self, name: &str, samples: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(self.src.join(name), spec).unwrap();
        for i in 0..samples {
            writer.write_sample((i % 251) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    /// Mark a source so the stand-in encoder corrupts its flac.
    pub fn corrupt(&self, name: &str) {
        std::fs::write(self.src.join(format!("{name}.corrupt")), b"x").unwrap();
    }

    pub fn config(&self) -> Config {
        let mut cfg = Config::new(self.src.clone(), self.dest.clone());
        cfg.instrument = "piano".to_string();
        cfg.speech_bin = self.bins.join("stt");
        cfg.flac_bin = self.bins.join("flac");
        cfg.par2_bin = self.bins.join("par2");
        cfg.xdelta3_bin = self.bins.join("xdelta3");
        // Temp dirs are frequently tmpfs, which cannot evict pages.
        cfg.evict = false;
        cfg
    }

    pub async fn run(&self, cfg: Config) -> RunReport {
        Engine::new(cfg, Arc::new(ScriptedPrompter::accept_defaults()))
            .run()
            .await
            .unwrap()
    }

    pub fn progress_dirs(&self) -> Vec<PathBuf> {
        std::fs::read_dir(&self.src)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".taketake."))
            .map(|e| e.path())
            .collect()
    }

    pub fn dest_names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.dest)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

pub fn write_script(path: &Path, body: &str) {
    let mut f = std::fs::File::create(path).unwrap();
    writeln!(f, "#!/bin/sh").unwrap();
    f.write_all(body.as_bytes()).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}
