fn main() {
    if let Err(err) = frame_pipeline::run() {
        eprintln!("Application error: {err}");
    }
}
