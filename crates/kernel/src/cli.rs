//! Admin command line.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use uuid::Uuid;

use lustra_kernel::editor::{Command, EditorSurface, LinkFlow, RichEditor, VirtualSurface};
use lustra_kernel::media::{ImageUpload, UploadError};
use lustra_kernel::models::{BlogPost, NewPost, PostStatus, UpdatePost};
use lustra_kernel::policy::Operation;
use lustra_kernel::{AppState, Config, ContentError};

/// How long to wait for the sign-in notification after a successful login.
const SIGN_IN_WAIT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "lustra")]
#[command(about = "Manage blog posts for the Lustra marketing site", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read and manage blog posts
    Posts {
        #[command(subcommand)]
        command: PostCommands,
    },

    /// Upload a cover image and print its public URL
    Upload {
        /// Image file to upload
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Set the uploaded image as this post's cover
        #[arg(long, value_name = "POST_ID")]
        post: Option<Uuid>,

        #[command(flatten)]
        credentials: Credentials,
    },

    /// Apply editor commands to a markup file and print the result
    Edit {
        /// Markup file to edit
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Select the first occurrence of this text before running commands
        #[arg(long, value_name = "TEXT")]
        select: Option<String>,

        /// Command to run, e.g. `bold` or `formatBlock=<h2>` (repeatable)
        #[arg(long = "exec", value_name = "COMMAND")]
        commands: Vec<String>,

        /// Link the selection to this URL
        #[arg(long, value_name = "URL")]
        link: Option<String>,

        /// Write the result back to FILE instead of printing it
        #[arg(long)]
        write: bool,
    },

    /// Show which operations need a signed-in administrator
    Policy,
}

#[derive(Subcommand)]
pub enum PostCommands {
    /// List published posts, or every post with --all
    List {
        #[arg(long)]
        all: bool,

        #[command(flatten)]
        credentials: Credentials,
    },

    /// Show a post by slug
    Show {
        #[arg(value_name = "SLUG")]
        slug: String,

        #[command(flatten)]
        credentials: Credentials,
    },

    /// Search titles, content and excerpts
    Search {
        #[arg(value_name = "QUERY")]
        query: String,

        /// Include drafts
        #[arg(long)]
        all: bool,

        #[command(flatten)]
        credentials: Credentials,
    },

    /// List tags used by published posts
    Tags,

    /// List published posts with a tag
    Tagged {
        #[arg(value_name = "TAG")]
        tag: String,
    },

    /// Create a post
    Create {
        #[arg(long)]
        title: String,

        #[command(flatten)]
        body: Body,

        #[arg(long)]
        excerpt: Option<String>,

        /// Tag to attach (repeatable)
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,

        #[arg(long, value_name = "URL")]
        image_url: Option<String>,

        /// Publish immediately instead of saving a draft
        #[arg(long)]
        publish: bool,

        #[command(flatten)]
        credentials: Credentials,
    },

    /// Update fields of a post
    Update {
        #[arg(value_name = "POST_ID")]
        id: Uuid,

        #[arg(long)]
        title: Option<String>,

        #[command(flatten)]
        body: Body,

        #[arg(long)]
        excerpt: Option<String>,

        /// Replace the tags (repeatable)
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,

        #[arg(long, value_name = "URL")]
        image_url: Option<String>,

        #[command(flatten)]
        credentials: Credentials,
    },

    /// Publish a draft
    Publish {
        #[arg(value_name = "POST_ID")]
        id: Uuid,

        #[command(flatten)]
        credentials: Credentials,
    },

    /// Return a post to draft
    Unpublish {
        #[arg(value_name = "POST_ID")]
        id: Uuid,

        #[command(flatten)]
        credentials: Credentials,
    },

    /// Delete a post
    Delete {
        #[arg(value_name = "POST_ID")]
        id: Uuid,

        #[command(flatten)]
        credentials: Credentials,
    },
}

/// Admin sign-in options.
#[derive(Args, Clone, Default)]
pub struct Credentials {
    #[arg(long, env = "ADMIN_EMAIL", hide_env_values = true)]
    email: Option<String>,

    #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

/// Post body given inline or from a file.
#[derive(Args, Clone, Default)]
pub struct Body {
    /// Post content as markup
    #[arg(long, conflicts_with = "content_file")]
    content: Option<String>,

    /// Read post content from a file
    #[arg(long, value_name = "FILE")]
    content_file: Option<PathBuf>,
}

impl Body {
    /// Content normalized through the editor, if any was given.
    async fn read(&self) -> Result<Option<String>> {
        let raw = match (&self.content, &self.content_file) {
            (Some(content), _) => content.clone(),
            (None, Some(path)) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?,
            (None, None) => return Ok(None),
        };
        let editor = RichEditor::mount(VirtualSurface::new(), &raw, |_| {});
        Ok(Some(editor.value()))
    }
}

/// Run a parsed command. Post and upload commands start the services
/// first and stop them afterwards.
pub async fn run(config: &Config, command: Commands) -> Result<()> {
    match command {
        Commands::Posts { command } => {
            with_services(config, |state| async move { run_posts(&state, command).await }).await
        }
        Commands::Upload {
            file,
            post,
            credentials,
        } => {
            with_services(config, |state| async move {
                upload(&state, &file, post, &credentials).await
            })
            .await
        }
        Commands::Edit {
            file,
            select,
            commands,
            link,
            write,
        } => edit(&file, select.as_deref(), &commands, link.as_deref(), write).await,
        Commands::Policy => {
            print_policy();
            Ok(())
        }
    }
}

async fn with_services<F, Fut>(config: &Config, work: F) -> Result<()>
where
    F: FnOnce(AppState) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let state = AppState::new(config).context("failed to initialize application state")?;
    state.start();
    state.session().ready().await;
    info!(
        authenticated = state.session().is_authenticated(),
        uploads = state.uploader().is_enabled(),
        "services started"
    );

    let result = work(state.clone()).await;
    state.shutdown().await;
    result
}

async fn run_posts(state: &AppState, command: PostCommands) -> Result<()> {
    let content = state.content();
    match command {
        PostCommands::List { all, credentials } => {
            if all {
                with_admin(state, &credentials, async {
                    print_posts(&content.posts());
                    Ok(())
                })
                .await
            } else {
                wait_for_published(state).await?;
                print_posts(&content.published_posts());
                Ok(())
            }
        }
        PostCommands::Show { slug, credentials } => {
            let show = async {
                match content.get_post_by_slug(&slug).await {
                    Some(post) => print_post(&post),
                    None => bail!("no post with slug {slug}"),
                }
                Ok(())
            };
            if credentials.email.is_some() {
                with_admin(state, &credentials, show).await
            } else {
                show.await
            }
        }
        PostCommands::Search {
            query,
            all,
            credentials,
        } => {
            if all {
                with_admin(state, &credentials, async {
                    let posts = content.search_all_posts(&query).await.map_err(report)?;
                    print_posts(&posts);
                    Ok(())
                })
                .await
            } else {
                wait_for_published(state).await?;
                print_posts(&content.search_published_posts(&query).await);
                Ok(())
            }
        }
        PostCommands::Tags => {
            for tag in content.get_published_tags().await {
                println!("{tag}");
            }
            Ok(())
        }
        PostCommands::Tagged { tag } => {
            print_posts(&content.get_published_posts_by_tag(&tag).await);
            Ok(())
        }
        PostCommands::Create {
            title,
            body,
            excerpt,
            tags,
            image_url,
            publish,
            credentials,
        } => {
            let new = NewPost {
                title,
                content: body.read().await?.unwrap_or_default(),
                excerpt,
                image_url,
                tags,
                status: if publish {
                    PostStatus::Published
                } else {
                    PostStatus::Draft
                },
            };
            with_admin(state, &credentials, async {
                let post = content.create_post(new).await.map_err(report)?;
                println!("created {} ({}, {})", post.id, post.slug, post.status);
                Ok(())
            })
            .await
        }
        PostCommands::Update {
            id,
            title,
            body,
            excerpt,
            tags,
            image_url,
            credentials,
        } => {
            let changes = UpdatePost {
                title,
                content: body.read().await?,
                excerpt,
                image_url,
                tags: (!tags.is_empty()).then_some(tags),
                ..UpdatePost::default()
            };
            with_admin(state, &credentials, async {
                let post = content.update_post(id, changes).await.map_err(report)?;
                println!("updated {} ({})", post.id, post.slug);
                Ok(())
            })
            .await
        }
        PostCommands::Publish { id, credentials } => {
            with_admin(state, &credentials, async {
                let post = content.publish_post(id).await.map_err(report)?;
                println!("published {} ({})", post.id, post.slug);
                Ok(())
            })
            .await
        }
        PostCommands::Unpublish { id, credentials } => {
            with_admin(state, &credentials, async {
                let post = content.unpublish_post(id).await.map_err(report)?;
                println!("unpublished {} ({})", post.id, post.slug);
                Ok(())
            })
            .await
        }
        PostCommands::Delete { id, credentials } => {
            with_admin(state, &credentials, async {
                content.delete_post(id).await.map_err(report)?;
                println!("deleted {id}");
                Ok(())
            })
            .await
        }
    }
}

async fn upload(
    state: &AppState,
    file: &Path,
    post: Option<Uuid>,
    credentials: &Credentials,
) -> Result<()> {
    let image = ImageUpload::from_path(file).await.map_err(upload_report)?;
    let uploaded = state.uploader().upload(&image).await.map_err(upload_report)?;
    println!("{}", uploaded.secure_url);

    if let Some(id) = post {
        let changes = UpdatePost {
            image_url: Some(uploaded.secure_url),
            ..UpdatePost::default()
        };
        with_admin(state, credentials, async {
            state
                .content()
                .update_post(id, changes)
                .await
                .map_err(report)?;
            println!("cover image set on {id}");
            Ok(())
        })
        .await?;
    }
    Ok(())
}

async fn edit(
    file: &Path,
    select: Option<&str>,
    commands: &[String],
    link: Option<&str>,
    write: bool,
) -> Result<()> {
    let markup = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let mut editor = RichEditor::mount(VirtualSurface::new(), &markup, |value| {
        debug!(len = value.len(), "editor content changed");
    });

    if let Some(needle) = select
        && !editor.surface_mut().select_text(needle)
    {
        bail!("text not found: {needle}");
    }

    for raw in commands {
        let (name, value) = match raw.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (raw.as_str(), None),
        };
        let command =
            Command::parse(name, value).ok_or_else(|| anyhow!("unknown editor command: {raw}"))?;
        editor.exec(command);
    }

    if let Some(url) = link {
        let mut no_prompt = |_: &str| -> Option<String> { Some(url.to_string()) };
        let flow = match editor.insert_link(&mut no_prompt) {
            LinkFlow::ModalOpened => editor.confirm_link(url),
            other => other,
        };
        if matches!(flow, LinkFlow::Cancelled) {
            bail!("rejected link url: {url}");
        }
    }

    let value = editor.surface().get_value();
    if write {
        tokio::fs::write(file, &value)
            .await
            .with_context(|| format!("failed to write {}", file.display()))?;
    } else {
        println!("{value}");
    }
    Ok(())
}

/// Sign in, wait for the admin collection, run `work`, then sign out.
async fn with_admin<F>(state: &AppState, credentials: &Credentials, work: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let email = credentials
        .email
        .as_deref()
        .context("--email or ADMIN_EMAIL is required")?;
    let password = credentials
        .password
        .as_deref()
        .context("--password or ADMIN_PASSWORD is required")?;

    let session = state.session();
    session.login(email, password).await.context("login failed")?;

    // Signed in remotely from here on: sign out whatever happens next.
    let result = match wait_for_admin(state).await {
        Ok(()) => work.await,
        Err(e) => Err(e),
    };
    session.logout().await;
    result
}

/// Wait for the sign-in notification, then for the admin collection.
async fn wait_for_admin(state: &AppState) -> Result<()> {
    let mut session_rx = state.session().subscribe();
    tokio::time::timeout(SIGN_IN_WAIT, session_rx.wait_for(|s| s.is_authenticated()))
        .await
        .context("timed out waiting for sign-in")?
        .map(|_| ())
        .context("session closed")?;

    let mut content_rx = state.content().subscribe();
    content_rx
        .wait_for(|c| c.admin_loaded || c.admin_error.is_some())
        .await
        .map(|_| ())
        .context("content store closed")?;
    if let Some(error) = state.content().snapshot().admin_error {
        debug!(%error, "admin collection failed to load");
    }
    Ok(())
}

async fn wait_for_published(state: &AppState) -> Result<()> {
    let mut rx = state.content().subscribe();
    rx.wait_for(|c| c.published_loaded || c.public_error.is_some())
        .await
        .map(|_| ())
        .context("content store closed")?;
    if let Some(error) = state.content().snapshot().public_error {
        bail!(error);
    }
    Ok(())
}

fn report(e: ContentError) -> anyhow::Error {
    let message = e.user_message();
    anyhow::Error::new(e).context(message)
}

fn upload_report(e: UploadError) -> anyhow::Error {
    let message = e.user_message();
    anyhow::Error::new(e).context(message)
}

fn print_posts(posts: &[BlogPost]) {
    if posts.is_empty() {
        println!("no posts");
        return;
    }
    for post in posts {
        println!(
            "{}  {:<9}  {:<40}  {}",
            post.id,
            post.status.as_str(),
            post.slug,
            post.title
        );
    }
}

fn print_post(post: &BlogPost) {
    println!("{}", post.title);
    println!("slug:      {}", post.slug);
    println!("status:    {}", post.status);
    println!("author:    {}", post.author_name);
    if let Some(published_at) = post.published_at {
        println!("published: {}", published_at.to_rfc3339());
    }
    if !post.tags.is_empty() {
        println!("tags:      {}", post.tags.join(", "));
    }
    if let Some(image_url) = &post.image_url {
        println!("image:     {image_url}");
    }
    println!();
    println!("{}", post.excerpt);
}

fn print_policy() {
    println!(
        "{:<24}  {:<6}  {:<12}  {}",
        "operation", "admin", "state", "on failure"
    );
    for op in Operation::ALL {
        println!(
            "{:<24}  {:<6}  {:<12}  {}",
            op.name(),
            if op.requires_admin() { "yes" } else { "no" },
            op.reconciliation().to_string(),
            op.on_failure()
        );
    }
}
