use crate::indexer::extract::ExtractorRegistry;

/// Print the built-in extractors and the extensions they claim
pub fn list_languages() {
    println!("Supported languages:");
    for (language, extensions) in ExtractorRegistry::with_defaults().languages() {
        let extensions: Vec<String> = extensions.iter().map(|e| format!(".{e}")).collect();
        println!("  {:<8} {}", language, extensions.join(" "));
    }
}
