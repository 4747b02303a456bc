pub fn print_help() {
    println!("\n🔎 Ask Commands:");
    println!("  <question>           - Answer from the indexed documents");
    println!("  ask <question>       - Same, explicitly");
    println!("  k <n>                - Number of documents to retrieve");
    println!();

    println!("📄 Ingest Commands:");
    println!("  ingest <image>       - Recognize and index one image");
    println!("  ingest-dir <folder>  - Index every image in a folder");
    println!();

    println!("⚙️ System Commands:");
    println!("  help  - Show this help menu");
    println!("  exit  - Exit the program");
    println!();
}
