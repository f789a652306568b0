// Stepwright: Action id and icon derivation for custom components

use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

pub const CUSTOM_PREFIX: &str = "custom_";
pub const DEFAULT_ICON: &str = "fa-cube";

/// Derive the registry id for a user-supplied action label.
///
/// The label is lowercased, stripped of diacritics (NFD, combining marks
/// removed), every run of non-alphanumeric characters becomes one `_`, and
/// leading/trailing underscores are trimmed before the `custom_` prefix is
/// applied. Ids that already carry the prefix are returned unchanged, so
/// applying the transform twice is the same as applying it once.
pub fn generate_action_id(label: &str) -> String {
    let folded: String = label
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect();

    let mut cleaned = String::with_capacity(folded.len());
    let mut pending_separator = false;
    for c in folded.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !cleaned.is_empty() {
                cleaned.push('_');
            }
            pending_separator = false;
            cleaned.push(c);
        } else {
            pending_separator = true;
        }
    }

    if cleaned.is_empty() {
        return format!("{}action", CUSTOM_PREFIX);
    }
    if cleaned.starts_with(CUSTOM_PREFIX) {
        return cleaned;
    }
    format!("{}{}", CUSTOM_PREFIX, cleaned)
}

static ICON_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"carpeta|folder|directorio|directory", "fa-folder-open"),
        (r"archivo|file|fichero", "fa-file"),
        (r"excel|hoja|sheet|csv|xlsx", "fa-file-excel"),
        (r"pdf", "fa-file-pdf"),
        (r"correo|e-?mail|mail", "fa-envelope"),
        (r"navegador|browser|web|url|p[aá]gina|page", "fa-globe"),
        (r"clic|click|pulsar|bot[oó]n|button", "fa-mouse-pointer"),
        (r"escribir|type|teclear|texto|text", "fa-keyboard"),
        (r"esperar|wait|delay|pausa", "fa-clock"),
        (r"base de datos|database|sql|query|consulta", "fa-database"),
        (r"api|http|rest|request|petici[oó]n", "fa-plug"),
        (r"sincroniz|sync", "fa-sync"),
        (r"contar|count|sumar|sum|calcular|calc", "fa-calculator"),
        (r"extraer|extract|leer|read|obtener|get", "fa-download"),
        (r"guardar|save|exportar|export|escribir archivo", "fa-save"),
        (r"eliminar|delete|borrar|remove", "fa-trash"),
        (r"script|powershell|comando|command|shell|cmd", "fa-terminal"),
        (r"mensaje|message|notific|alert", "fa-comment"),
        (r"variable|asignar|assign", "fa-code"),
    ]
    .into_iter()
    .filter_map(|(pattern, icon)| match Regex::new(pattern) {
        Ok(re) => Some((re, icon)),
        Err(e) => {
            tracing::error!(pattern = %pattern, "Invalid icon rule: {}", e);
            None
        }
    })
    .collect()
});

/// Pick an icon for a label from the ordered rule table; first match wins.
pub fn suggest_icon_for_action(label: &str) -> &'static str {
    let lower = label.to_lowercase();
    ICON_RULES
        .iter()
        .find(|(re, _)| re.is_match(&lower))
        .map(|(_, icon)| *icon)
        .unwrap_or(DEFAULT_ICON)
}
