//! Extension lookup tables. Matching is case-insensitive.

use crate::db::FileType;

pub fn file_type_for(extension: Option<&str>) -> FileType {
    let Some(ext) = extension else {
        return FileType::Other;
    };
    match ext.to_ascii_lowercase().as_str() {
        "swift" | "ts" | "tsx" | "js" | "jsx" | "py" | "go" | "rs" | "java" | "kt" | "rb"
        | "c" | "cpp" | "h" | "hpp" | "cs" | "php" | "scala" | "clj" | "ex" | "exs" | "hs"
        | "ml" | "vue" | "svelte" | "astro" | "lua" | "r" | "jl" | "zig" | "nim" | "dart"
        | "groovy" | "perl" | "sh" | "bash" | "zsh" => FileType::Code,
        "md" | "markdown" | "txt" | "rst" | "adoc" | "org" | "tex" | "html" | "htm"
        | "asciidoc" => FileType::Documentation,
        "json" | "yaml" | "yml" | "toml" | "xml" | "plist" | "ini" | "conf" | "config"
        | "env" | "properties" | "editorconfig" | "gitignore" | "dockerignore" => {
            FileType::Configuration
        }
        _ => FileType::Other,
    }
}

pub fn language_for(extension: Option<&str>) -> Option<&'static str> {
    let language = match extension?.to_ascii_lowercase().as_str() {
        "swift" => "Swift",
        "ts" | "tsx" => "TypeScript",
        "js" | "jsx" => "JavaScript",
        "py" => "Python",
        "go" => "Go",
        "rs" => "Rust",
        "java" => "Java",
        "kt" | "kts" => "Kotlin",
        "rb" => "Ruby",
        "c" => "C",
        "cpp" | "cc" | "cxx" => "C++",
        "h" => "C/C++ Header",
        "hpp" => "C++ Header",
        "cs" => "C#",
        "php" => "PHP",
        "scala" => "Scala",
        "clj" => "Clojure",
        "cljs" => "ClojureScript",
        "ex" | "exs" => "Elixir",
        "hs" => "Haskell",
        "ml" => "OCaml",
        "vue" => "Vue",
        "svelte" => "Svelte",
        "lua" => "Lua",
        "r" => "R",
        "jl" => "Julia",
        "zig" => "Zig",
        "nim" => "Nim",
        "dart" => "Dart",
        "groovy" => "Groovy",
        "perl" | "pl" => "Perl",
        "sh" => "Shell",
        "bash" => "Bash",
        "zsh" => "Zsh",
        "md" | "markdown" => "Markdown",
        "json" => "JSON",
        "yaml" | "yml" => "YAML",
        "toml" => "TOML",
        "xml" => "XML",
        "html" | "htm" => "HTML",
        "css" => "CSS",
        "scss" => "SCSS",
        "sass" => "Sass",
        "less" => "Less",
        _ => return None,
    };
    Some(language)
}

/// Extensions that are never text, skipped before reading.
pub fn is_known_binary(extension: Option<&str>) -> bool {
    let Some(ext) = extension else {
        return false;
    };
    matches!(
        ext.to_ascii_lowercase().as_str(),
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "ico" | "icns" | "webp" | "tiff" | "psd"
            | "pdf" | "zip" | "gz" | "tgz" | "bz2" | "xz" | "7z" | "rar" | "tar" | "jar"
            | "war" | "class" | "o" | "a" | "so" | "dylib" | "dll" | "exe" | "bin" | "wasm"
            | "rlib" | "pyc" | "mp3" | "mp4" | "mov" | "avi" | "wav" | "flac" | "ogg"
            | "ttf" | "otf" | "woff" | "woff2" | "eot" | "sqlite" | "sqlite3" | "db"
            | "dmg" | "iso"
    )
}
