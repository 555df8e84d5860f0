use clap::Parser;
use miette::Result;
use renstack_core::{
    StackError, StackOptions, Stacks, Value,
    frame::FrameId,
    function::{Function, FunctionClass, KeyList},
    heap::RootId,
    symbol::SymbolTable,
};
use std::rc::Rc;
use tracing::{info, warn};

/// Renstack - exercise the interpreter execution stacks
#[derive(Parser, Debug)]
#[command(name = "renstack")]
#[command(about = "Simulate nested calls against the execution stacks", long_about = None)]
struct Args {
    /// Nesting depth of the simulated call chain
    #[arg(long, default_value_t = 64)]
    depth: usize,

    /// Arguments taken by each simulated function
    #[arg(long, default_value_t = 4)]
    arity: usize,

    /// Values each call pushes onto the data stack before returning
    #[arg(long, default_value_t = 16)]
    pushes: usize,

    /// Reify every Nth frame (0 disables reification)
    #[arg(long, default_value_t = 0)]
    reify_every: usize,

    /// Simulate native functions, whose contexts are held while they run
    #[arg(long)]
    native: bool,

    /// Keep the result blocks reachable and report how many survive collection
    #[arg(long)]
    keep_results: bool,

    /// Initial data stack size in cells
    #[arg(long)]
    initial_size: Option<usize>,

    /// Data stack limit in cells
    #[arg(long)]
    limit: Option<usize>,

    /// Chunker size in bytes
    #[arg(long)]
    chunker_size: Option<usize>,

    /// Chunk stack limit in bytes
    #[arg(long)]
    arena_limit: Option<usize>,
}

impl Args {
    fn options(&self) -> StackOptions {
        let defaults = StackOptions::default();
        StackOptions {
            initial_data_stack_size: self
                .initial_size
                .unwrap_or(defaults.initial_data_stack_size),
            data_stack_limit: self.limit.unwrap_or(defaults.data_stack_limit),
            chunker_size: self.chunker_size.unwrap_or(defaults.chunker_size),
            arena_limit: self.arena_limit.unwrap_or(defaults.arena_limit),
            ..defaults
        }
    }
}

struct Simulation<'a> {
    args: &'a Args,
    stacks: Stacks,
    function: Rc<Function>,
    deepest: usize,
    reified: usize,
    peak_chunkers: usize,
    peak_capacity: usize,
}

impl Simulation<'_> {
    /// Enters a call at `level`, recursing until the requested depth, and
    /// leaves the callee's results as a block on the data stack.
    fn call(&mut self, level: usize) -> Result<(), StackError> {
        let frame = self
            .stacks
            .push_function_frame(self.function.clone(), None)?;
        self.fulfill(frame, level)?;
        self.deepest = self.deepest.max(level + 1);

        if self.args.reify_every != 0 && level % self.args.reify_every == 0 {
            self.stacks.reify(frame)?;
            self.reified += 1;
        }

        let mark = self.stacks.data_stack().dsp();
        for i in 0..self.args.pushes {
            self.stacks
                .data_stack_mut()
                .push(Value::Integer((level * self.args.pushes + i) as i64))?;
        }
        if level + 1 < self.args.depth {
            self.call(level + 1)?;
        }

        self.peak_chunkers = self.peak_chunkers.max(self.stacks.arena().chunkers().count());
        self.peak_capacity = self.peak_capacity.max(self.stacks.data_stack().capacity());

        let block = self.stacks.pop_block(mark);
        self.stacks.pop_frame(frame)?;
        self.stacks.data_stack_mut().push(Value::Block(block))
    }

    fn fulfill(&mut self, frame: FrameId, level: usize) -> Result<(), StackError> {
        for index in 1..=self.args.arity {
            self.stacks
                .set_arg(frame, index, Value::Integer((level + index) as i64))?;
        }
        self.stacks.finish_fulfilling(frame)
    }
}

/// Roots the outermost result block, if the run left one.
fn keep_result(stacks: &mut Stacks) -> Option<RootId> {
    if stacks.data_stack().is_empty() {
        return None;
    }
    let result = *stacks.data_stack().top();
    Some(stacks.heap_mut().register_root(result))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging subscriber
    use tracing_subscriber::{EnvFilter, fmt};

    // Use RUST_LOG environment variable to control log level
    // Default to WARN if not set
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))
        .map_err(|e| miette::miette!(e))?;

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let mut symbols = SymbolTable::new();
    let params: KeyList = (0..args.arity)
        .map(|i| symbols.intern(&format!("arg{i}")))
        .collect();
    let class = if args.native {
        FunctionClass::Native
    } else {
        FunctionClass::User
    };
    let function = Function::new(Some(symbols.intern("simulate")), params, class);

    let stacks = Stacks::startup(args.options()).map_err(|e| miette::miette!(e))?;
    let mut sim = Simulation {
        args: &args,
        stacks,
        function,
        deepest: 0,
        reified: 0,
        peak_chunkers: 0,
        peak_capacity: 0,
    };

    let mark = sim.stacks.mark();
    let outcome = if args.depth == 0 { Ok(()) } else { sim.call(0) };
    if let Err(err) = &outcome {
        warn!(%err, depth = sim.deepest, "simulation stopped");
    }

    let root = match &outcome {
        Ok(()) if args.keep_results => keep_result(&mut sim.stacks),
        _ => None,
    };
    sim.stacks.unwind_to(mark);

    let objects = sim.stacks.heap().len();
    let freed = sim.stacks.collect_garbage();
    info!(objects, freed, "collected after run");

    println!("depth reached:      {}", sim.deepest);
    println!("frames reified:     {}", sim.reified);
    println!("peak chunkers:      {}", sim.peak_chunkers);
    println!("peak stack cells:   {}", sim.peak_capacity);
    println!("managed objects:    {objects}");
    println!("collected:          {freed}");
    println!("survivors:          {}", sim.stacks.heap().len());

    if let Some(root) = root {
        sim.stacks.heap_mut().unregister_root(root);
        sim.stacks.collect_garbage();
    }
    sim.stacks.shutdown();

    outcome.map_err(|e| miette::miette!(e))
}
