//! Compiled-in behavioral signature definitions.
//!
//! These cover techniques with a strong textual fingerprint where a template
//! file often carries no signature block of its own. At load time a
//! definition attaches to the matching technique's template, or becomes a
//! signature-only template when no file exists for it.

/// A behavioral signature definition before regex compilation.
#[derive(Debug, Clone)]
pub struct SignatureDef {
    pub technique_id: String,
    pub technique_name: String,
    /// Command-line regex patterns.
    pub patterns: Vec<String>,
    /// Process image basenames.
    pub processes: Vec<String>,
    /// Registry path regex patterns.
    pub registry_paths: Vec<String>,
}

impl SignatureDef {
    pub fn new(technique_id: impl Into<String>, technique_name: impl Into<String>) -> Self {
        Self {
            technique_id: technique_id.into(),
            technique_name: technique_name.into(),
            patterns: Vec::new(),
            processes: Vec::new(),
            registry_paths: Vec::new(),
        }
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn process(mut self, process: impl Into<String>) -> Self {
        self.processes.push(process.into());
        self
    }

    pub fn registry_path(mut self, pattern: impl Into<String>) -> Self {
        self.registry_paths.push(pattern.into());
        self
    }
}

/// The default signature set.
pub fn default_signatures() -> Vec<SignatureDef> {
    vec![
        SignatureDef::new("T1059.001", "PowerShell Command & Scripting")
            .pattern(r"powershell\.exe.*-enc")
            .pattern(r"powershell\.exe.*-encodedcommand")
            .pattern(r"powershell\.exe.*-nop.*-w\s*hidden")
            .pattern(r"powershell\.exe.*-executionpolicy\s*bypass")
            .pattern(r"powershell\.exe.*invoke-expression")
            .pattern(r"powershell\.exe.*iex\s*\(")
            .pattern(r"powershell\.exe.*downloadstring")
            .pattern(r"powershell\.exe.*-sta.*-noni")
            .process("powershell.exe"),
        SignatureDef::new("T1003.001", "LSASS Memory Dump")
            .pattern(r"procdump.*-ma.*lsass")
            .pattern(r"mimikatz")
            .pattern(r"sekurlsa::logonpasswords")
            .pattern(r"comsvcs\.dll.*minidump")
            .process("procdump.exe")
            .process("procdump64.exe")
            .process("mimikatz.exe"),
        SignatureDef::new("T1112", "Registry Modification")
            .pattern(r"reg\.exe.*add")
            .pattern(r"reg\.exe.*delete")
            .pattern(r"set-itemproperty.*registry")
            .pattern(r"new-itemproperty.*registry")
            .registry_path(r"HKLM\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Run")
            .registry_path(r"HKCU\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Run"),
        SignatureDef::new("T1547.001", "Registry Run Keys Persistence")
            .pattern(r"reg.*add.*\\run")
            .pattern(r"set-itemproperty.*currentversion\\run")
            .registry_path(r"CurrentVersion\\Run")
            .registry_path(r"CurrentVersion\\RunOnce"),
        SignatureDef::new("T1218.011", "Rundll32 Proxy Execution")
            .pattern(r"rundll32\.exe.*javascript")
            .pattern(r"rundll32\.exe.*vbscript")
            .pattern(r"rundll32\.exe.*shell32")
            .process("rundll32.exe"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_signatures_cover_known_techniques() {
        let signatures = default_signatures();
        assert_eq!(signatures.len(), 5);
        assert!(signatures.iter().any(|s| s.technique_id == "T1059.001"));
        assert!(signatures.iter().all(|s| !s.patterns.is_empty()));
    }

    #[test]
    fn test_builder_accumulates() {
        let def = SignatureDef::new("T0000", "Test")
            .pattern("a")
            .pattern("b")
            .process("x.exe")
            .registry_path("Run");
        assert_eq!(def.patterns.len(), 2);
        assert_eq!(def.processes.len(), 1);
        assert_eq!(def.registry_paths.len(), 1);
    }
}
