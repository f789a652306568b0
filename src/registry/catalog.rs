// Stepwright: Built-in action catalog

use super::{ActionDescriptor, FieldFormat, FieldSpec};

fn action(id: &str, icon: &str, label: &str, fields: Vec<FieldSpec>) -> ActionDescriptor {
    ActionDescriptor {
        action: id.to_string(),
        icon: icon.to_string(),
        label: label.to_string(),
        description: String::new(),
        is_container: false,
        is_custom: false,
        created_at: None,
        fields,
    }
}

fn container(id: &str, icon: &str, label: &str, fields: Vec<FieldSpec>) -> ActionDescriptor {
    ActionDescriptor {
        is_container: true,
        ..action(id, icon, label, fields)
    }
}

fn url(name: &str) -> FieldSpec {
    FieldSpec::required(name).with_format(FieldFormat::Url)
}

fn seconds(name: &str, max: f64) -> FieldSpec {
    FieldSpec::optional(name)
        .with_aliases(&["time"])
        .with_format(FieldFormat::Number {
            min: Some(0.0),
            max: Some(max),
        })
}

/// Assignment steps name their target with any of these keys.
fn assignment() -> Vec<FieldSpec> {
    vec![
        FieldSpec::required("variableName").with_aliases(&["name", "variable"]),
        FieldSpec::optional("value"),
    ]
}

/// Actions every installation knows about. Their required fields and
/// formats drive pre-run validation.
pub fn builtin_actions() -> Vec<ActionDescriptor> {
    use FieldSpec as F;

    vec![
        // Browser
        action("open_browser", "fa-globe", "Abrir navegador", vec![F::optional("browser")]),
        action("navigate", "fa-compass", "Navegar a URL", vec![url("url")]),
        action("click", "fa-mouse-pointer", "Hacer clic", vec![F::required("selector")]),
        action(
            "type",
            "fa-keyboard",
            "Escribir texto",
            vec![F::required("selector"), F::required("text")],
        ),
        action("extract", "fa-download", "Extraer texto", vec![F::required("selector")]),
        action("screenshot", "fa-camera", "Captura de pantalla", vec![]),
        action("close_browser", "fa-times-circle", "Cerrar navegador", vec![]),
        action("wait_element", "fa-hourglass", "Esperar elemento", vec![F::required("selector")]),
        // HTTP
        action("http_get", "fa-plug", "HTTP GET", vec![url("url")]),
        action("http_post", "fa-plug", "HTTP POST", vec![url("url")]),
        action("http_put", "fa-plug", "HTTP PUT", vec![url("url")]),
        action("http_delete", "fa-plug", "HTTP DELETE", vec![url("url")]),
        // Shell / process
        action("run_powershell", "fa-terminal", "Ejecutar PowerShell", vec![F::required("script")]),
        action("powershell_run", "fa-terminal", "Ejecutar PowerShell", vec![F::required("script")]),
        action("run_shell", "fa-terminal", "Ejecutar script", vec![F::required("script")]),
        action("cmd_run", "fa-terminal", "Ejecutar CMD", vec![F::required("command")]),
        action("run_application", "fa-rocket", "Ejecutar aplicación", vec![F::required("path")]),
        // Files and folders
        action("select_folder", "fa-folder-open", "Seleccionar carpeta", vec![F::optional("title")]),
        action("select_file", "fa-file", "Seleccionar archivo", vec![F::optional("title")]),
        action("list_files", "fa-list", "Listar archivos", vec![F::required("path")]),
        action("count_files", "fa-calculator", "Contar archivos", vec![F::required("path")]),
        action("file_read", "fa-file-alt", "Leer archivo", vec![F::required("path")]),
        action("read_file", "fa-file-alt", "Leer archivo", vec![F::required("path")]),
        action(
            "file_write",
            "fa-save",
            "Escribir archivo",
            vec![F::required("path"), F::optional("content")],
        ),
        action(
            "write_file",
            "fa-save",
            "Escribir archivo",
            vec![F::required("path"), F::optional("content")],
        ),
        action(
            "file_copy",
            "fa-copy",
            "Copiar archivo",
            vec![F::required("source"), F::required("destination")],
        ),
        action(
            "copy_file",
            "fa-copy",
            "Copiar archivo",
            vec![F::required("source"), F::required("destination")],
        ),
        action("file_delete", "fa-trash", "Eliminar archivo", vec![F::required("path")]),
        action("delete_file", "fa-trash", "Eliminar archivo", vec![F::required("path")]),
        // Variables
        action("assign", "fa-code", "Asignar variable", assignment()),
        action("set_variable", "fa-code", "Asignar variable", assignment()),
        action("assign_variable", "fa-code", "Asignar variable", assignment()),
        // Waits
        action("wait", "fa-clock", "Esperar", vec![seconds("seconds", 3600.0)]),
        action("delay", "fa-clock", "Retraso", vec![seconds("seconds", 3600.0)]),
        action("wait_seconds", "fa-clock", "Esperar segundos", vec![seconds("seconds", 3600.0)]),
        action("pause", "fa-pause", "Pausa", vec![seconds("seconds", 3600.0)]),
        // Messages and logs
        action("message_box", "fa-comment", "Mostrar mensaje", vec![F::required("message")]),
        action("show_message", "fa-comment", "Mostrar mensaje", vec![F::required("message")]),
        action("alert", "fa-exclamation", "Alerta", vec![F::required("message")]),
        action("log", "fa-stream", "Registrar mensaje", vec![F::required("message")]),
        action("log_message", "fa-stream", "Registrar mensaje", vec![F::required("message")]),
        action("log_info", "fa-info-circle", "Log informativo", vec![F::required("message")]),
        action("log_warning", "fa-exclamation-triangle", "Log de advertencia", vec![F::required("message")]),
        action("log_error", "fa-times-circle", "Log de error", vec![F::required("message")]),
        // Messaging
        action(
            "send_email",
            "fa-envelope",
            "Enviar correo",
            vec![
                F::required("to").with_format(FieldFormat::Email),
                F::required("subject"),
                F::optional("body"),
            ],
        ),
        // Control flow (interpreted by the automation backend)
        container("if_condition", "fa-code-branch", "Si / Entonces", vec![F::required("condition")]),
        container(
            "for_loop",
            "fa-redo",
            "Repetir N veces",
            vec![F::required("iterations").with_format(FieldFormat::Number {
                min: Some(0.0),
                max: None,
            })],
        ),
        container("while_loop", "fa-sync", "Mientras", vec![F::required("condition")]),
        container("for_each", "fa-list-ol", "Para cada elemento", vec![F::required("collection")]),
        container("try_catch", "fa-shield-alt", "Intentar / Capturar", vec![]),
        container("group", "fa-object-group", "Grupo", vec![]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_ids_unique() {
        let actions = builtin_actions();
        let ids: HashSet<&str> = actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(ids.len(), actions.len());
    }

    #[test]
    fn test_no_builtin_is_custom() {
        assert!(builtin_actions().iter().all(|a| !a.is_custom && a.created_at.is_none()));
    }

    #[test]
    fn test_containers_flagged() {
        let actions = builtin_actions();
        let group = actions.iter().find(|a| a.action == "group").unwrap();
        assert!(group.is_container);
        let navigate = actions.iter().find(|a| a.action == "navigate").unwrap();
        assert!(!navigate.is_container);
        assert_eq!(navigate.fields[0].format, Some(FieldFormat::Url));
    }

    #[test]
    fn test_assignment_actions_share_name_keys() {
        let actions = builtin_actions();
        for id in ["assign", "set_variable", "assign_variable"] {
            let d = actions.iter().find(|a| a.action == id).unwrap();
            let keys: Vec<&str> = d.fields[0].keys().collect();
            assert_eq!(keys, ["variableName", "name", "variable"]);
        }
    }
}
