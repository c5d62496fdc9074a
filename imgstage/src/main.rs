use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use imgstage::output::Output;
use imgstage::{
    Backend, CmakeBackend, CmakeOptions, ConfigError, GoBackend, GoOptions, RealCommandRunner,
    StagingConfig, StagingPipeline, StagingReport,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "imgstage", version)]
#[command(
    about = "Build a project and stage it with its runtime dependencies into a container image",
    long_about = None
)]
struct Cli {
    /// Program listing shared library dependencies, with ldd-style output
    #[arg(long, global = true, value_name = "PROGRAM")]
    dependency_lister: Option<String>,

    /// Print the staging report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a Go project with a static `go get`
    #[command(after_help = "Placeholders for --asset and --exclude: <GOPATH>, <PROJPATH>")]
    Go {
        #[command(flatten)]
        common: CommonArgs,

        /// Go binary to use
        #[arg(long, default_value = "go", value_name = "PATH")]
        go_binary: String,

        /// Custom GOPATH (default: a directory inside the scratch dir)
        #[arg(long, value_name = "DIR")]
        go_path: Option<PathBuf>,
    },
    /// Clone, build and install a CMake project
    #[command(
        after_help = "Placeholders for --asset and --exclude: <BUILDPATH>, <INSTALLPATH>, <SRCPATH>"
    )]
    Cmake {
        #[command(flatten)]
        common: CommonArgs,

        /// Look for binaries in this directory, relative to the install root
        /// (e.g. /usr/local/mysql/bin)
        #[arg(long, value_name = "DIR")]
        binary_dir: Option<PathBuf>,

        /// Build these already downloaded sources instead of cloning
        #[arg(long, value_name = "DIR")]
        reuse_src_dir: Option<PathBuf>,

        /// Parameter passed to cmake, can be repeated
        #[arg(
            long = "cmake-param",
            value_name = "PARAM",
            allow_hyphen_values = true
        )]
        cmake_params: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Project to build, e.g. github.com/example/app or github.com/example/tools/...
    project: Option<String>,

    /// Argument passed to the app, can be repeated
    #[arg(long, value_name = "ARG", allow_hyphen_values = true)]
    exec: Vec<String>,

    /// Which built binary becomes the entrypoint
    #[arg(long, value_name = "NAME")]
    use_binary: Option<String>,

    /// Additional asset as <path in image>:<local path>, can be repeated
    #[arg(long, value_name = "ASSET")]
    asset: Vec<String>,

    /// Local path left out of the image, can be repeated
    #[arg(long, value_name = "PATH")]
    exclude: Vec<String>,

    /// Do not delete the scratch directory
    #[arg(long)]
    keep_tmp_dir: bool,

    /// Build the project and the image in this directory
    #[arg(long, value_name = "DIR")]
    tmp_dir: Option<PathBuf>,

    /// Reuse a scratch directory with an already built project; its image
    /// contents are recreated
    #[arg(long, value_name = "DIR")]
    reuse_tmp_dir: Option<PathBuf>,

    /// Where to write the image (default: <project base name>.aci)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

impl CommonArgs {
    fn into_config(self, dependency_lister: Option<String>) -> StagingConfig {
        StagingConfig {
            project: self.project.unwrap_or_default(),
            exec: self.exec,
            use_binary: self.use_binary,
            assets: self.asset,
            excludes: self.exclude,
            keep_tmp_dir: self.keep_tmp_dir,
            tmp_dir: self.tmp_dir,
            reuse_tmp_dir: self.reuse_tmp_dir,
            output: self.output,
            dependency_lister,
        }
    }
}

impl Commands {
    fn into_backend(self) -> (Box<dyn Backend>, CommonArgs) {
        match self {
            Commands::Go {
                common,
                go_binary,
                go_path,
            } => (
                Box::new(GoBackend::new(GoOptions { go_binary, go_path })),
                common,
            ),
            Commands::Cmake {
                common,
                binary_dir,
                reuse_src_dir,
                cmake_params,
            } => (
                Box::new(CmakeBackend::new(CmakeOptions {
                    binary_dir,
                    reuse_src_dir,
                    cmake_params,
                })),
                common,
            ),
        }
    }
}

fn main() {
    // e.g. RUST_LOG=imgstage=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("imgstage=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        Output::error(format!("{err:#}"));
        if err.chain().any(|cause| cause.is::<ConfigError>()) {
            Output::hint("Run 'imgstage <go|cmake> --help' for usage");
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let (mut backend, common) = cli.command.into_backend();
    let config = common.into_config(cli.dependency_lister);

    if !cli.json && !config.project.is_empty() {
        Output::info(format!("Building {} with {}", config.project, backend.name()));
    }

    let pipeline = StagingPipeline::new(Arc::new(RealCommandRunner));
    let report = pipeline.run(backend.as_mut(), &config)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &StagingReport) {
    Output::success(format!("Wrote {}", report.image.display()));
    Output::kv("image", &report.image_name);
    Output::kv("entrypoint", format!("/{}", report.binary));
    Output::kv("assets", report.assets_processed.to_string());
    Output::kv("sha256", &report.sha256);
    if let Some(dir) = &report.kept_scratch_dir {
        Output::kv("scratch dir", dir.display().to_string());
    }
}
