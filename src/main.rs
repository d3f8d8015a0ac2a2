use flow::{require_principal, AnalyticsService, Authenticator, FlowError, FlowVersionService, NewFlow, Principal,
           GENERIC_FAILURE};
use imci_api::{AdminConfig, ApiKeyManager, DashboardService, ExportService, FETCH_FAILED};
use imci_domain::{DomainRepository, VariableInput, VariableType, STANDARD_MEDICATIONS};
use imci_persistence::Database;
use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Menú interactivo para administrar los flows IMCI sobre la base de datos
/// configurada (`DATABASE_URL`).
///
/// El operador se identifica con `IMCI_OPERATOR_EMAIL` (o se pide al
/// arrancar) y debe estar permitido por `ALLOWED_EMAILS`. Sin sesión el
/// menú sólo permite consultas.
fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AdminConfig::from_env();
    // Abre el pool y aplica las migraciones embebidas
    let db = Database::from_env()?;
    let repo = Arc::new(db.flow_repository());
    let domain: Arc<dyn DomainRepository> = Arc::new(db.domain_repository());

    let email = match &config.operator_email {
        Some(e) => e.clone(),
        None => prompt("Email del operador: ")?.trim().to_string(),
    };
    let session = match Authenticator::new(repo.clone(), config.sign_in_policy.clone()).sign_in(&email, None) {
        Ok(p) => {
            println!("Sesión iniciada como {} ({})", p.email, p.role.as_str());
            Some(p)
        }
        Err(e) => {
            eprintln!("No se pudo iniciar sesión: {}", e.public_message(GENERIC_FAILURE));
            println!("Modo sólo lectura");
            None
        }
    };

    let versions = FlowVersionService::new(repo.clone());
    let analytics = AnalyticsService::new(repo.clone());
    let dashboard = DashboardService::new(repo.clone(), domain.clone());
    let export = ExportService::new(repo.clone(), domain.clone());
    // Sin API_ENCRYPTION_KEY las opciones de API key quedan deshabilitadas
    let api_keys = match config.cipher() {
        Ok(cipher) => Some(ApiKeyManager::new(Arc::new(db.api_config_repository()), cipher, &config.api_base_url)),
        Err(e) => {
            eprintln!("Aviso: {}", e.public_message(GENERIC_FAILURE));
            None
        }
    };

    loop {
        println!("\n== IMCI admin ==");
        println!("1) Ver flows");
        println!("2) Crear flow");
        println!("3) Ver versiones de un flow");
        println!("4) Nueva versión (draft) de un flow");
        println!("5) Duplicar versión");
        println!("6) Publicar versión");
        println!("7) Archivar versión");
        println!("8) Eliminar versión (draft)");
        println!("9) Ver variables de una versión");
        println!("10) Crear variable global");
        println!("11) Cargar catálogo de medicamentos");
        println!("12) Exportar versiones publicadas (JSON)");
        println!("13) Configurar API key");
        println!("14) Ver configuración de API");
        println!("15) Estadísticas");
        println!("16) Uso de un flow");
        println!("17) Salir");
        let choice = prompt("Elige una opción: ")?;
        match choice.trim() {
            "1" => match versions.list_flows() {
                Ok(flows) => {
                    println!("\nID                                   | STATUS    | VERS | NAME");
                    println!("-----------------------------------------------------------------------------------");
                    for f in flows {
                        println!("{} | {:<9} | {:>4} | {}", f.flow.id, f.flow.status.as_str(), f.versions_count, f.flow.name);
                    }
                }
                Err(e) => report("Error listando flows", &e),
            },
            "2" => {
                let Some(principal) = signed_in(session.as_ref()) else { continue };
                let name = prompt("Nombre: ")?;
                let description = prompt("Descripción (enter para vacío): ")?;
                let description = Some(description.trim().to_string()).filter(|d| !d.is_empty());
                match versions.create_flow(NewFlow::new(name.trim(), description), principal) {
                    Ok((flow, v1)) => println!("Flow creado: {} (versión 1: {})", flow.id, v1.id),
                    Err(e) => report("Error creando flow", &e),
                }
            }
            "3" => {
                let Some(flow_id) = prompt_uuid("Flow id (UUID): ")? else { continue };
                match versions.versions(&flow_id) {
                    Ok(list) => {
                        for v in list {
                            let published = v.version
                                             .published_at
                                             .map(|t| t.to_rfc3339())
                                             .unwrap_or_else(|| "-".into());
                            println!("#{:<3} {} | {:<9} | publicada: {}",
                                     v.version.version_number, v.version.id, v.version.status.as_str(), published);
                        }
                    }
                    Err(e) => report("Error listando versiones", &e),
                }
            }
            "4" => {
                let Some(principal) = signed_in(session.as_ref()) else { continue };
                let Some(flow_id) = prompt_uuid("Flow id (UUID): ")? else { continue };
                match versions.create(&flow_id, principal) {
                    Ok(v) => println!("Versión #{} creada: {}", v.version_number, v.id),
                    Err(e) => report("Error creando versión", &e),
                }
            }
            "5" => {
                let Some(principal) = signed_in(session.as_ref()) else { continue };
                let Some(version_id) = prompt_uuid("Versión a duplicar (UUID): ")? else { continue };
                let notes = prompt("Notas (enter para ninguna): ")?;
                let notes = Some(notes.trim()).filter(|n| !n.is_empty());
                match versions.duplicate(&version_id, notes, principal) {
                    Ok(v) => println!("Versión #{} creada: {}", v.version_number, v.id),
                    Err(e) => report("Error duplicando versión", &e),
                }
            }
            "6" => {
                let Some(principal) = signed_in(session.as_ref()) else { continue };
                let Some(version_id) = prompt_uuid("Versión a publicar (UUID): ")? else { continue };
                match versions.publish(&version_id, principal) {
                    Ok(v) => println!("Versión #{} publicada", v.version_number),
                    Err(e) => eprintln!("{}", e.public_message("Could not publish version.")),
                }
            }
            "7" => {
                let Some(principal) = signed_in(session.as_ref()) else { continue };
                let Some(version_id) = prompt_uuid("Versión a archivar (UUID): ")? else { continue };
                match versions.archive(&version_id, principal) {
                    Ok(v) => println!("Versión #{} archivada", v.version_number),
                    Err(e) => report("Error archivando versión", &e),
                }
            }
            "8" => {
                let Some(principal) = signed_in(session.as_ref()) else { continue };
                let Some(version_id) = prompt_uuid("Versión a eliminar (UUID): ")? else { continue };
                let confirm = prompt(&format!("Confirma borrado de {}? escribir 'yes' para confirmar: ", version_id))?;
                if confirm.trim().to_lowercase() == "yes" {
                    match versions.delete(&version_id, principal) {
                        Ok(()) => println!("Versión eliminada: {}", version_id),
                        Err(e) => report("Error eliminando versión", &e),
                    }
                } else {
                    println!("Borrado cancelado");
                }
            }
            "9" => {
                let Some(version_id) = prompt_uuid("Versión (UUID): ")? else { continue };
                match domain.list_variables_for_version(&version_id) {
                    Ok(vars) => {
                        for v in vars {
                            let scope = if v.is_global { "global" } else { "versión" };
                            println!("{:<24} | {:<8} | {:<7} | {}", v.variable_id, v.variable_type.as_str(), scope, v.name);
                        }
                    }
                    Err(e) => eprintln!("Error listando variables: {}", e.public_message(GENERIC_FAILURE)),
                }
            }
            "10" => {
                let Some(principal) = signed_in(session.as_ref()) else { continue };
                let variable_id = prompt("Variable ID (ej: age_months): ")?;
                let name = prompt("Nombre: ")?;
                let kind = prompt("Tipo (string/number/boolean, enter para string): ")?;
                let variable_type = match kind.trim() {
                    "" => VariableType::String,
                    other => match other.parse::<VariableType>() {
                        Ok(t) => t,
                        Err(_) => {
                            eprintln!("Tipo inválido");
                            continue;
                        }
                    },
                };
                let input = VariableInput::global(variable_id.trim(), name.trim(), variable_type);
                match domain.create_variable(input, Some(principal.user_id)) {
                    Ok(v) => println!("Variable creada: {} ({})", v.variable_id, v.id),
                    Err(e) => eprintln!("Error creando variable: {}", e.public_message(GENERIC_FAILURE)),
                }
            }
            "11" => {
                if signed_in(session.as_ref()).is_none() {
                    continue;
                }
                match domain.seed_medications(&STANDARD_MEDICATIONS) {
                    Ok(n) => println!("{} medicamento(s) añadidos", n),
                    Err(e) => eprintln!("Error cargando catálogo: {}", e.public_message(GENERIC_FAILURE)),
                }
            }
            "12" => match export.published_snapshot() {
                Ok(snapshot) => match serde_json::to_string_pretty(&snapshot) {
                    Ok(json) => println!("{}", json),
                    Err(e) => eprintln!("Error serializando exportación: {}", e),
                },
                Err(e) => eprintln!("{}", e.public_message(FETCH_FAILED)),
            },
            "13" => {
                let Some(manager) = &api_keys else {
                    eprintln!("API_ENCRYPTION_KEY no está definida");
                    continue;
                };
                let Some(principal) = signed_in(session.as_ref()) else { continue };
                let key = prompt("Nueva API key: ")?;
                match manager.set_api_key(&key, principal) {
                    Ok(()) => println!("API key actualizada"),
                    Err(e) => eprintln!("Error guardando API key: {}", e.public_message(GENERIC_FAILURE)),
                }
            }
            "14" => {
                let Some(manager) = &api_keys else {
                    eprintln!("API_ENCRYPTION_KEY no está definida");
                    continue;
                };
                match manager.get_api_config() {
                    Ok(view) => {
                        println!("Base URL: {}", view.api_base_url);
                        let key = view.api_key.as_deref().map(mask).unwrap_or_else(|| "<sin configurar>".into());
                        println!("API key:  {}", key);
                    }
                    Err(e) => eprintln!("Error leyendo configuración: {}", e.public_message(GENERIC_FAILURE)),
                }
            }
            "15" => match dashboard.stats() {
                Ok(s) => {
                    println!("Usuarios: {}", s.user_count);
                    println!("Flows: {}", s.flow_count);
                    println!("Variables globales: {}", s.variable_count);
                    println!("Sesiones: {} ({} finalizadas)", s.total_sessions, s.total_finalized_sessions);
                    if let Some(last) = s.last_updated_flow {
                        println!("Último flow editado: {} ({})", last.title, last.updated_at.to_rfc3339());
                    }
                }
                Err(e) => eprintln!("Error calculando estadísticas: {}", e.public_message(GENERIC_FAILURE)),
            },
            "16" => {
                let Some(flow_id) = prompt_uuid("Flow id (UUID): ")? else { continue };
                match analytics.flow_summary(&flow_id) {
                    Ok(s) => {
                        println!("{}: {} sesiones, {:.1}% completadas, {:.1}% finalizadas, {} nodos de media",
                                 s.flow_name,
                                 s.total_sessions,
                                 s.completion_rate,
                                 s.finalization_rate,
                                 s.average_nodes_visited);
                    }
                    Err(e) => report("Error calculando uso", &e),
                }
            }
            "17" => {
                println!("Saliendo...");
                break;
            }
            other => {
                println!("Opción inválida: {}", other);
            }
        }
    }

    Ok(())
}

/// Las opciones que modifican datos exigen sesión.
fn signed_in(session: Option<&Principal>) -> Option<&Principal> {
    match require_principal(session) {
        Ok(p) => Some(p),
        Err(e) => {
            report("Operación no permitida", &e);
            None
        }
    }
}

fn report(context: &str, e: &FlowError) {
    eprintln!("{}: {}", context, e.public_message(GENERIC_FAILURE));
}

/// Muestra sólo los últimos cuatro caracteres.
fn mask(key: &str) -> String {
    let visible: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("****{}", visible)
}

fn prompt_uuid(msg: &str) -> io::Result<Option<Uuid>> {
    let s = prompt(msg)?;
    match Uuid::parse_str(s.trim()) {
        Ok(u) => Ok(Some(u)),
        Err(_) => {
            eprintln!("UUID inválido");
            Ok(None)
        }
    }
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}
