use std::rc::Rc;

use clap::Parser;

use oct_rs::bound::Bound;
use oct_rs::constraint::{Constraint, LinForm, Rel};
use oct_rs::shape::{AffineForm, CoeffKind, Shape, Sign, Topology};
use oct_rs::stats::Stats;
use oct_rs::types::Var;

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Loop guard: iterate while `i <= bound`.
    #[arg(value_name = "INT", default_value = "100")]
    bound: i64,

    /// Use the octagonal domain instead of bounded differences.
    #[clap(long)]
    octagon: bool,

    /// Widening tokens (delayed precision loss).
    #[clap(long, value_name = "INT", default_value = "0")]
    tokens: u64,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let args = Cli::parse();
    println!("args = {:?}", args);

    let topology = if args.octagon {
        Topology::Octagon
    } else {
        Topology::BoundedDifference
    };

    // Analyze the loop
    //   i := 0; s := 0;
    //   while i <= bound { i := i + 1; s := s + i; }
    // over dimensions 0 = i, 1 = s.
    let i = Var::new(0);
    let s = Var::new(1);

    let stats = Rc::new(Stats::new());

    let mut init = Shape::universe(topology, CoeffKind::Integer, 2)?;
    init.attach_stats(stats.clone());
    init.add_constraints(&[
        Constraint::new_int(LinForm::Plus(i), Rel::Eq, 0)?,
        Constraint::new_int(LinForm::Plus(s), Rel::Eq, 0)?,
    ])?;
    println!("init = {{ {} }}", init);

    let guard = Constraint::new_int(LinForm::Plus(i), Rel::Le, args.bound)?;
    let one = Bound::int(1);

    // Body transfer function on a shape already meeting the guard.
    let body = |shape: &Shape| -> color_eyre::Result<Shape> {
        let mut next = shape.clone();
        next.add_constraint(&guard)?;
        if next.is_empty() {
            return Ok(next);
        }
        next.affine_image(i, &AffineForm::var_offset(Sign::Pos, i, one.clone(), one.clone()))?;
        // s := s + i, approximated by the interval of i after the increment.
        let b = next.to_box();
        let lo = b.interval(i).lo().clone();
        let hi = b.interval(i).hi().clone();
        next.affine_image(s, &AffineForm::var_offset(Sign::Pos, s, lo, hi))?;
        Ok(next)
    };

    let mut tokens = args.tokens;
    let mut current = init.clone();
    let mut iterations = 0;
    loop {
        iterations += 1;
        let previous = current.clone();
        let mut next = body(&current)?;
        next.upper_bound_assign(&init)?;
        next.upper_bound_assign(&current)?;
        current = next;
        current.widening_assign_with_tokens(&previous, &mut tokens)?;
        if current == previous {
            break;
        }
        if iterations > 1000 {
            log::warn!("fixpoint did not stabilize after {} iterations", iterations);
            break;
        }
    }
    println!("post-widening invariant = {{ {} }}", current);

    // One narrowing pass against a refined iterate recovers the guard exit.
    let mut refined = body(&current)?;
    refined.upper_bound_assign(&init)?;
    current.narrowing_assign(&refined)?;
    println!("post-narrowing invariant = {{ {} }}", current);

    println!("converged after {} iterations", iterations);
    println!("stats: {}", stats);

    Ok(())
}
