use std::path::Path;

/// LSP `languageId` for a file, from its extension. Empty when unknown.
pub fn detect_language_id(path: &Path) -> &'static str {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name == "makefile" {
        return "makefile";
    }
    if name == "dockerfile" {
        return "dockerfile";
    }
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "abap" => "abap",
        "bat" => "bat",
        "bib" | "bibtex" => "bibtex",
        "clj" => "clojure",
        "coffee" => "coffeescript",
        "c" => "c",
        "cpp" | "cxx" | "cc" | "c++" => "cpp",
        "cs" => "csharp",
        "css" => "css",
        "d" => "d",
        "pas" | "pascal" => "pascal",
        "diff" | "patch" => "diff",
        "dart" => "dart",
        "dockerfile" => "dockerfile",
        "ex" | "exs" => "elixir",
        "erl" | "hrl" => "erlang",
        "fs" | "fsi" | "fsx" | "fsscript" => "fsharp",
        "gitcommit" => "git-commit",
        "gitrebase" => "git-rebase",
        "go" => "go",
        "groovy" => "groovy",
        "hbs" | "handlebars" => "handlebars",
        "hs" => "haskell",
        "html" | "htm" => "html",
        "ini" => "ini",
        "java" => "java",
        "js" => "javascript",
        "jsx" => "javascriptreact",
        "json" => "json",
        "tex" | "latex" => "latex",
        "less" => "less",
        "lua" => "lua",
        "makefile" => "makefile",
        "md" | "markdown" => "markdown",
        "m" => "objective-c",
        "mm" => "objective-cpp",
        "pl" => "perl",
        "pm" => "perl6",
        "php" => "php",
        "ps1" | "psm1" => "powershell",
        "pug" | "jade" => "jade",
        "py" => "python",
        "r" => "r",
        "cshtml" | "razor" => "razor",
        "rb" => "ruby",
        "rs" => "rust",
        "scss" => "scss",
        "sass" => "sass",
        "scala" => "scala",
        "shader" => "shaderlab",
        "sh" | "bash" | "zsh" | "ksh" => "shellscript",
        "sql" => "sql",
        "swift" => "swift",
        "ts" => "typescript",
        "tsx" => "typescriptreact",
        "xml" => "xml",
        "xsl" => "xsl",
        "yaml" | "yml" => "yaml",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_languages() {
        assert_eq!(detect_language_id(Path::new("/a/main.rs")), "rust");
        assert_eq!(detect_language_id(Path::new("/a/App.TSX")), "typescriptreact");
        assert_eq!(detect_language_id(Path::new("/a/Makefile")), "makefile");
        assert_eq!(detect_language_id(Path::new("/a/blob.xyz")), "");
    }
}
