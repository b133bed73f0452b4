mod codec;
mod config;
mod error;
mod model;
mod registry;
mod store;
mod sync;

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use dialoguer::{Confirm, Input, Password, Select};

use crate::config::Settings;
use crate::error::SyncError;
use crate::model::{ConfigDocument, License, Vip};
use crate::registry::{AppItem, Registry};
use crate::store::{GithubStore, public_file_url};
use crate::sync::{DocState, Document};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("init", _)) => run_init(),
        Some(("login", _)) => run_login(),
        Some(("logout", _)) => run_logout(),
        Some((name, sub)) => run_remote_command(name, sub).await,
        None => unreachable!("subcommand required"),
    }
}

fn cli() -> Command {
    Command::new("confsync")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Edits JSON config documents stored in a GitHub repository")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("init").about("Write the settings file (target repo, branch, app list path)"))
        .subcommand(Command::new("login").about("Store the GitHub token"))
        .subcommand(Command::new("logout").about("Remove the stored token"))
        .subcommand(Command::new("list").about("List registered apps"))
        .subcommand(
            Command::new("add")
                .about("Register an app config file")
                .arg(Arg::new("name").required(true))
                .arg(Arg::new("repo").required(true).help("owner/repo holding the config file"))
                .arg(Arg::new("path").required(true).help("Path of the JSON file inside the repo"))
                .arg(Arg::new("branch").long("branch").value_name("BRANCH").default_value("main")),
        )
        .subcommand(
            Command::new("rm")
                .about("Remove an app from the registry")
                .arg(Arg::new("name").required(true))
                .arg(Arg::new("yes").long("yes").short('y').action(ArgAction::SetTrue).help("Skip the confirmation prompt")),
        )
        .subcommand(
            Command::new("rename")
                .about("Rename a registered app")
                .arg(Arg::new("from").required(true))
                .arg(Arg::new("to").required(true)),
        )
        .subcommand(
            Command::new("show")
                .about("Load an app's config and print it")
                .arg(Arg::new("name").required(true)),
        )
        .subcommand(
            Command::new("create")
                .about("Create the remote config file with default values")
                .arg(Arg::new("name").required(true)),
        )
        .subcommand(
            Command::new("edit")
                .about("Interactively edit an app's config and save it")
                .arg(Arg::new("name").required(true)),
        )
        .subcommand(
            Command::new("set")
                .about("Set individual fields and save")
                .arg(Arg::new("name").required(true))
                .arg(Arg::new("title").long("title").value_name("TEXT"))
                .arg(Arg::new("body").long("body").value_name("TEXT"))
                .arg(Arg::new("vip").long("vip").value_parser(["on", "off"]))
                .arg(Arg::new("enter-package").long("enter-package").value_name("PKG"))
                .arg(Arg::new("left-url").long("left-url").value_name("URL"))
                .arg(Arg::new("right-url").long("right-url").value_name("URL"))
                .arg(Arg::new("message").long("message").value_name("TEXT").help("Commit message for the save")),
        )
        .subcommand(
            Command::new("url")
                .about("Print the public raw URL of an app's config file")
                .arg(Arg::new("name").required(true)),
        )
}

// *************** Local commands ***************

fn run_init() -> Result<()> {
    let existing = Settings::load()?;
    let repo: String = Input::new()
        .with_prompt("Repository (owner/repo)")
        .with_initial_text(existing.as_ref().map(|s| s.repo.clone()).unwrap_or_default())
        .interact_text()?;
    let branch: String = Input::new()
        .with_prompt("Branch")
        .default(
            existing
                .as_ref()
                .map(|s| s.branch.clone())
                .unwrap_or_else(|| "main".to_string()),
        )
        .interact_text()?;
    let apps_path: String = Input::new()
        .with_prompt("App list path")
        .default(
            existing
                .map(|s| s.apps_path)
                .unwrap_or_else(|| "configs/apps.json".to_string()),
        )
        .interact_text()?;

    let settings = Settings {
        repo,
        branch,
        apps_path,
    };
    settings.store()?;
    println!("Settings written.");
    Ok(())
}

fn run_login() -> Result<()> {
    let token = Password::new()
        .with_prompt("GitHub token (contents read/write)")
        .interact()?;
    if token.is_empty() {
        bail!("Empty token, nothing stored.");
    }
    config::store_token(&token)?;
    println!("Token stored.");
    Ok(())
}

fn run_logout() -> Result<()> {
    config::clear_token()?;
    println!("Token removed.");
    Ok(())
}

// *************** Remote commands ***************

async fn run_remote_command(name: &str, matches: &ArgMatches) -> Result<()> {
    let settings = Settings::load()?.context("No settings found. Run `confsync init` first.")?;
    let token = config::load_token().with_context(|| {
        format!(
            "No credential found. Run `confsync login` or set {}.",
            config::TOKEN_ENV
        )
    })?;
    let store = GithubStore::new(token)?;
    let mut registry = Registry::new(settings.list_location());
    registry
        .ensure_list(&store)
        .await
        .context("Failed to load the app list")?;

    match name {
        "list" => run_list(&registry),
        "add" => run_add(&store, &mut registry, matches).await,
        "rm" => run_rm(&store, &mut registry, matches).await,
        "rename" => run_rename(&store, &mut registry, matches).await,
        "show" => run_show(&store, &mut registry, matches).await,
        "create" => run_create(&store, &mut registry, matches).await,
        "edit" => run_edit(&store, &mut registry, matches).await,
        "set" => run_set(&store, &mut registry, matches).await,
        "url" => run_url(&registry, matches),
        other => unreachable!("unknown subcommand {other}"),
    }
}

fn run_list(registry: &Registry) -> Result<()> {
    let apps = registry.apps();
    if apps.is_empty() {
        println!("No apps registered. Add one with `confsync add`.");
        return Ok(());
    }
    for app in apps {
        println!("{:<16} {}:{} ({})", app.name, app.repo, app.path, app.branch);
    }
    Ok(())
}

async fn run_add(store: &GithubStore, registry: &mut Registry, matches: &ArgMatches) -> Result<()> {
    let item = AppItem {
        name: arg(matches, "name"),
        repo: arg(matches, "repo"),
        path: arg(matches, "path"),
        branch: arg(matches, "branch"),
    };
    let name = item.name.clone();
    registry.add(store, item).await.map_err(explain)?;
    println!("Added '{}'.", name);
    Ok(())
}

async fn run_rm(store: &GithubStore, registry: &mut Registry, matches: &ArgMatches) -> Result<()> {
    let name = arg(matches, "name");
    if !matches.get_flag("yes") {
        let confirmed = Confirm::new()
            .with_prompt(format!("Remove '{}' from the registry?", name))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }
    registry.remove(store, &name).await.map_err(explain)?;
    println!("Removed '{}'. The remote config file itself is untouched.", name);
    Ok(())
}

async fn run_rename(
    store: &GithubStore,
    registry: &mut Registry,
    matches: &ArgMatches,
) -> Result<()> {
    let from = arg(matches, "from");
    let to = arg(matches, "to");
    registry.rename(store, &from, &to).await.map_err(explain)?;
    println!("Renamed '{}' to '{}'.", from, to);
    Ok(())
}

async fn run_show(store: &GithubStore, registry: &mut Registry, matches: &ArgMatches) -> Result<()> {
    let name = arg(matches, "name");
    open_loaded(store, registry, &name).await?;

    let doc = registry.document().context("no document loaded")?;
    println!("{}", serde_json::to_string_pretty(&doc.to_remote()?)?);

    let app = registry.selected().context("no app selected")?;
    println!();
    if let Some(sha) = registry.document_sha() {
        println!("Version:    {}", sha);
    }
    println!("Public URL: {}", public_file_url(&app.repo, &app.branch, &app.path));
    Ok(())
}

async fn run_create(
    store: &GithubStore,
    registry: &mut Registry,
    matches: &ArgMatches,
) -> Result<()> {
    let name = arg(matches, "name");
    registry.select(&name)?;
    registry.load_selected(store).await.map_err(explain)?;

    match registry.doc_state() {
        DocState::Missing => {
            registry.create_selected(store).await.map_err(explain)?;
            println!("Created '{}' with default values.", name);
        }
        DocState::Loaded { .. } => {
            println!("'{}' already exists on the remote, nothing to do.", name);
        }
        _ => bail!("'{}' is in an unexpected state after load", name),
    }
    Ok(())
}

async fn run_edit(store: &GithubStore, registry: &mut Registry, matches: &ArgMatches) -> Result<()> {
    let name = arg(matches, "name");
    open_loaded(store, registry, &name).await?;

    let current = registry.document().context("no document loaded")?.clone();
    let updated = prompt_document(current)?;
    registry.edit_selected(|doc| *doc = updated)?;

    let message: String = Input::new()
        .with_prompt("Commit message")
        .default(format!("update {}", name))
        .interact_text()?;
    registry
        .save_selected(store, &message)
        .await
        .map_err(explain)?;
    println!("Saved.");
    Ok(())
}

async fn run_set(store: &GithubStore, registry: &mut Registry, matches: &ArgMatches) -> Result<()> {
    let name = arg(matches, "name");

    let title = matches.get_one::<String>("title").cloned();
    let body = matches.get_one::<String>("body").cloned();
    let vip = matches.get_one::<String>("vip").map(|raw| match raw.as_str() {
        "off" => Vip::Off,
        _ => Vip::On,
    });
    let enter_package = matches.get_one::<String>("enter-package").cloned();
    let left_url = matches.get_one::<String>("left-url").cloned();
    let right_url = matches.get_one::<String>("right-url").cloned();

    if [&title, &body, &enter_package, &left_url, &right_url]
        .iter()
        .all(|field| field.is_none())
        && vip.is_none()
    {
        bail!("Nothing to set. Pass at least one field flag (see `confsync set --help`).");
    }

    open_loaded(store, registry, &name).await?;
    registry.edit_selected(|doc| {
        if let Some(title) = title {
            doc.title = title;
        }
        if let Some(body) = body {
            doc.body = body;
        }
        if let Some(vip) = vip {
            doc.vip = vip;
        }
        if let Some(enter_package) = enter_package {
            doc.enter_package = enter_package;
        }
        if let Some(left_url) = left_url {
            doc.left_url = left_url;
        }
        if let Some(right_url) = right_url {
            doc.right_url = right_url;
        }
    })?;

    let message = matches
        .get_one::<String>("message")
        .cloned()
        .unwrap_or_else(|| format!("update {}", name));
    registry
        .save_selected(store, &message)
        .await
        .map_err(explain)?;
    println!("Saved.");
    Ok(())
}

fn run_url(registry: &Registry, matches: &ArgMatches) -> Result<()> {
    let name = arg(matches, "name");
    let index = registry
        .find(&name)
        .with_context(|| format!("no app named '{}'", name))?;
    let app = &registry.apps()[index];
    println!("{}", public_file_url(&app.repo, &app.branch, &app.path));
    Ok(())
}

// *************** Helpers ***************

fn arg(matches: &ArgMatches, id: &str) -> String {
    matches.get_one::<String>(id).unwrap().clone() // Safe: required or defaulted
}

/// Selects and loads an app, turning Missing into a create hint.
async fn open_loaded(store: &GithubStore, registry: &mut Registry, name: &str) -> Result<()> {
    registry.select(name)?;
    registry.load_selected(store).await.map_err(explain)?;
    if matches!(registry.doc_state(), DocState::Missing) {
        bail!(
            "'{}' does not exist on the remote yet. Run `confsync create {}` first.",
            name,
            name
        );
    }
    Ok(())
}

/// Renders recoverable sync errors with the action that recovers them.
fn explain(err: SyncError) -> anyhow::Error {
    match &err {
        SyncError::Conflict { .. } => anyhow::anyhow!(
            "{}\nThe remote changed since it was loaded. Re-run the command to reload and reapply your change.",
            err
        ),
        SyncError::Auth => anyhow::anyhow!(
            "{}\nRun `confsync login` with a token that has contents read/write on the repository.",
            err
        ),
        _ => err.into(),
    }
}

fn prompt_field(label: &str, current: &str) -> Result<String> {
    Input::new()
        .with_prompt(label)
        .with_initial_text(current)
        .allow_empty(true)
        .interact_text()
        .map_err(Into::into)
}

fn prompt_document(mut doc: ConfigDocument) -> Result<ConfigDocument> {
    let vip_index = Select::new()
        .with_prompt("VIP")
        .items(&["on", "off"])
        .default(if doc.vip == Vip::On { 0 } else { 1 })
        .interact()?;
    doc.vip = if vip_index == 0 { Vip::On } else { Vip::Off };

    doc.title = prompt_field("title", &doc.title)?;
    doc.body = prompt_field("body", &doc.body)?;
    doc.enter_package = prompt_field("enterPackage", &doc.enter_package)?;
    doc.left_url = prompt_field("leftUrl", &doc.left_url)?;
    doc.right_url = prompt_field("rightUrl", &doc.right_url)?;
    edit_licenses(&mut doc.licenses)?;
    Ok(doc)
}

fn edit_licenses(licenses: &mut Vec<License>) -> Result<()> {
    loop {
        if licenses.is_empty() {
            println!("No licenses.");
        } else {
            for license in licenses.iter() {
                println!("  {} (expires {})", license.id, license.expire);
            }
        }
        let choice = Select::new()
            .with_prompt("Licenses")
            .items(&["done", "add", "remove"])
            .default(0)
            .interact()?;
        match choice {
            0 => break,
            1 => {
                let id: String = Input::new().with_prompt("license id").interact_text()?;
                let expire: String = Input::new()
                    .with_prompt("expire (YYYYMMDD)")
                    .interact_text()?;
                licenses.push(License { id, expire });
            }
            2 => {
                if licenses.is_empty() {
                    println!("No licenses to remove.");
                    continue;
                }
                let labels: Vec<String> = licenses
                    .iter()
                    .map(|license| format!("{} (expires {})", license.id, license.expire))
                    .collect();
                let index = Select::new()
                    .with_prompt("Remove which license")
                    .items(&labels)
                    .interact()?;
                licenses.remove(index);
            }
            _ => unreachable!(),
        }
    }
    Ok(())
}
