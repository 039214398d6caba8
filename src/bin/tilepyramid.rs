use std::io::Write as _;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};

use tilepyramid::{
    AddressPrinter, DirectoryLoader, DirectorySink, RenderOpts, TileCache, TileSet, TreePath,
};

const NM_PER_UM: f64 = 1e3;

#[derive(Parser, Debug)]
#[command(name = "tilepyramid", version)]
struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render every node of the pyramid into an output directory.
    Render(RenderArgs),
    /// Print the integer address of every node a render would produce, in dependency order.
    Addresses(AddressArgs),
    /// Rebuild one node, composing internal nodes from children already on disk.
    Target(TargetArgs),
    /// Summarize the tile cache and the tree a render would build.
    Info(InfoArgs),
    /// Print the path of every tile that overlaps the selected box.
    Query(QueryArgs),
}

/// Output box as fractions of the tile bounding box.
#[derive(Args, Debug)]
struct RegionArgs {
    /// Box origin as a fraction of the tile bounding box.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    ox: f64,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    oy: f64,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    oz: f64,

    /// Box extent as a fraction of the tile bounding box.
    #[arg(long, default_value_t = 1.0)]
    lx: f64,
    #[arg(long, default_value_t = 1.0)]
    ly: f64,
    #[arg(long, default_value_t = 1.0)]
    lz: f64,
}

impl RegionArgs {
    fn ori(&self) -> [f64; 3] {
        [self.ox, self.oy, self.oz]
    }

    fn size(&self) -> [f64; 3] {
        [self.lx, self.ly, self.lz]
    }
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// Tile cache file, or a directory holding `tilebase.cache.json`.
    #[arg(long)]
    tiles: PathBuf,

    /// Leaf voxel size along x (µm).
    #[arg(long = "x-um", default_value_t = 0.5)]
    x_um: f64,
    /// Leaf voxel size along y (µm).
    #[arg(long = "y-um", default_value_t = 0.5)]
    y_um: f64,
    /// Leaf voxel size along z (µm).
    #[arg(long = "z-um", default_value_t = 0.5)]
    z_um: f64,

    #[command(flatten)]
    region: RegionArgs,

    /// Children per node: 4 (split x, y) or 8 (split x, y, z).
    #[arg(long, default_value_t = 8)]
    nchildren: usize,

    /// Leaf voxel count threshold; accepts suffixes k, M, G, T, P, E.
    #[arg(long = "count-of-leaf", default_value = "64M")]
    count_of_leaf: String,

    /// Force every tile's x field of view (µm).
    #[arg(long = "fov-x-um")]
    fov_x_um: Option<f64>,
    /// Force every tile's y field of view (µm).
    #[arg(long = "fov-y-um")]
    fov_y_um: Option<f64>,

    /// Pad the output box so x and y span a power-of-two number of voxels.
    #[arg(long = "pow2-pad")]
    pow2_pad: bool,

    /// Working memory per tile (bytes); accepts suffixes k, M, G, T, P, E.
    #[arg(long = "device-mem")]
    device_mem: Option<String>,

    /// Anti-aliasing width (nm) applied to every leaf along x, y and z.
    #[arg(long = "leaf-filter-nm", num_args = 3, value_names = ["X", "Y", "Z"])]
    leaf_filter_nm: Option<Vec<f32>>,
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[command(flatten)]
    build: BuildArgs,

    /// Output directory.
    #[arg(long)]
    out: PathBuf,

    /// Also write YZ and ZX views of every node.
    #[arg(long)]
    ortho: bool,
}

#[derive(Args, Debug)]
struct AddressArgs {
    #[command(flatten)]
    build: BuildArgs,

    /// Only print addresses under this node (`1/0/3` or `103`).
    #[arg(long)]
    prefix: Option<String>,
}

#[derive(Args, Debug)]
struct TargetArgs {
    #[command(flatten)]
    build: BuildArgs,

    /// Node to rebuild (`1/0/3` or `103`; `/` is the root).
    #[arg(long)]
    address: String,

    /// Output directory holding the already rendered children.
    #[arg(long)]
    out: PathBuf,

    /// Also write YZ and ZX views of the rebuilt node.
    #[arg(long)]
    ortho: bool,
}

#[derive(Args, Debug)]
struct InfoArgs {
    #[command(flatten)]
    build: BuildArgs,

    /// Also report the box of this node.
    #[arg(long)]
    address: Option<String>,
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Tile cache file, or a directory holding `tilebase.cache.json`.
    #[arg(long)]
    tiles: PathBuf,

    #[command(flatten)]
    region: RegionArgs,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Addresses(args) => cmd_addresses(args),
        Command::Target(args) => cmd_target(args),
        Command::Info(args) => cmd_info(args),
        Command::Query(args) => cmd_query(args),
    }
}

/// Slash form when it contains `/` (or is empty), otherwise one digit per level.
fn parse_address(s: &str) -> anyhow::Result<TreePath> {
    let path = if s.contains('/') || s.trim().is_empty() {
        TreePath::parse_path_string(s)
    } else {
        TreePath::parse_digits(s)
    };
    path.with_context(|| format!("parse address '{s}'"))
}

fn load_cache(path: &std::path::Path) -> anyhow::Result<TileCache> {
    TileCache::load(path).with_context(|| format!("load tile cache '{}'", path.display()))
}

fn load_tiles(args: &BuildArgs) -> anyhow::Result<TileSet> {
    let mut tiles = load_cache(&args.tiles)?.to_tile_set()?;
    if args.fov_x_um.is_some() || args.fov_y_um.is_some() {
        let fov = |v: Option<f64>| v.map_or(-1.0, |um| um * NM_PER_UM);
        tiles.override_fov(fov(args.fov_x_um), fov(args.fov_y_um))?;
    }
    Ok(tiles)
}

fn build_opts(args: &BuildArgs, tiles: &TileSet) -> anyhow::Result<RenderOpts> {
    let mut opts = RenderOpts {
        voxel_um: [args.x_um, args.y_um, args.z_um],
        ori: args.region.ori(),
        size: args.region.size(),
        nchildren: args.nchildren,
        countof_leaf: tilepyramid::parse_human_size(&args.count_of_leaf)
            .context("parse --count-of-leaf")?,
        ..RenderOpts::default()
    };
    if let Some(mem) = &args.device_mem {
        opts.device_free_bytes =
            Some(tilepyramid::parse_human_size(mem).context("parse --device-mem")?);
    }
    if let Some(nm) = &args.leaf_filter_nm {
        opts.output_filter_size_nm = [nm[0], nm[1], nm[2]];
    }
    if args.pow2_pad {
        let full = tiles.aabb()?;
        let (ori, size) = tilepyramid::pad_to_pow2(opts.ori, opts.size, &full, opts.voxel_nm())
            .context("pad output box to a power of two")?;
        opts.ori = ori;
        opts.size = size;
    }
    opts.validate()?;
    Ok(opts)
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let tiles = load_tiles(&args.build)?;
    let opts = build_opts(&args.build, &tiles)?;
    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("create output dir '{}'", args.out.display()))?;
    let mut sink = DirectorySink::new(&args.out).with_ortho(args.ortho);
    let summary = tilepyramid::render(&opts, &tiles, &mut sink)?;
    eprintln!(
        "wrote {} nodes ({} leaves) to {}",
        sink.written(),
        summary.leaves,
        args.out.display()
    );
    Ok(())
}

fn cmd_addresses(args: AddressArgs) -> anyhow::Result<()> {
    let tiles = load_tiles(&args.build)?;
    let opts = build_opts(&args.build, &tiles)?;
    let prefix = args.prefix.as_deref().map(parse_address).transpose()?;
    let stdout = std::io::stdout();
    let mut printer = AddressPrinter::new(stdout.lock());
    tilepyramid::addresses(&opts, &tiles, &mut printer, prefix.as_ref())?;
    printer.into_inner().flush().context("flush stdout")?;
    Ok(())
}

fn cmd_target(args: TargetArgs) -> anyhow::Result<()> {
    let tiles = load_tiles(&args.build)?;
    let opts = build_opts(&args.build, &tiles)?;
    let target = parse_address(&args.address)?;
    let ndim = tiles.iter().next().map_or(4, |t| t.shape().ndim());
    let mut loader = DirectoryLoader::new(&args.out).with_ndim(ndim);
    let mut sink = DirectorySink::new(&args.out).with_ortho(args.ortho);
    tilepyramid::render_target(&opts, &tiles, &mut sink, &mut loader, &target)?;
    if sink.written() == 0 {
        anyhow::bail!("node {target} produced no output");
    }
    eprintln!("rebuilt node {target} in {}", args.out.display());
    Ok(())
}

fn cmd_info(args: InfoArgs) -> anyhow::Result<()> {
    let tiles = load_tiles(&args.build)?;
    let opts = build_opts(&args.build, &tiles)?;
    let full = tiles.aabb()?;
    let bbox = tilepyramid::output_box(&opts, &tiles)?;
    let depth = tilepyramid::tree_depth(&opts, &tiles)?;
    let mut types: Vec<String> = tiles.iter().map(|t| t.shape().pixel_type.to_string()).collect();
    types.sort();
    types.dedup();

    let mut out = std::io::stdout().lock();
    writeln!(out, "tiles: {}", tiles.len())?;
    writeln!(out, "pixel types: {}", types.join(", "))?;
    writeln!(out, "tile bounds (nm): {full}")?;
    writeln!(out, "output box (nm): {bbox}")?;
    writeln!(out, "depth: {depth}")?;
    if let Some(address) = &args.address {
        let path = parse_address(address)?;
        let (ori, size) = path.fraction_of(opts.ori, opts.size, opts.nchildren);
        let node = full.select_fraction(ori, size);
        writeln!(out, "node {path}: ori {ori:?} size {size:?} -> {node}")?;
    }
    Ok(())
}

fn cmd_query(args: QueryArgs) -> anyhow::Result<()> {
    let cache = load_cache(&args.tiles)?;
    let tiles = cache.to_tile_set()?;
    let bbox = tiles.select(args.region.ori(), args.region.size())?;
    let root = cache.root();
    let mut out = std::io::stdout().lock();
    for i in tiles.hitting(&bbox) {
        writeln!(out, "{}", root.join(&cache.tiles[i].path).display())?;
    }
    Ok(())
}
