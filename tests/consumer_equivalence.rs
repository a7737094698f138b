// this_file: tests/consumer_equivalence.rs
//! The block-flag consumer path must write exactly what the dense path writes

use covrast::alpha_consumer::{AlphaConsumer, MaskAlphaConsumer};
use covrast::config::RasterConfig;
use covrast::context::{RenderStyle, RendererContext, StrokeStyle};
use covrast::renderer::{FillRule, PixelBounds};
use covrast::Path;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random spans of one row, as the renderer would accumulate them
struct Row {
    deltas: Vec<i32>,
    flags: Vec<i32>,
    from: usize,
    to: usize,
}

fn random_row(rng: &mut StdRng, width: usize, lg: u32, max_alpha: i32) -> Row {
    let mut deltas = vec![0i32; width + 2];
    let mut flags = vec![0i32; ((width + 2) >> lg) + 2];
    let (mut from, mut to) = (usize::MAX, 0);
    for _ in 0..rng.random_range(0..6) {
        let a = rng.random_range(0..width);
        let b = rng.random_range(a..=width);
        let v = rng.random_range(1..=max_alpha);
        deltas[a] += v;
        deltas[b] -= v;
        flags[a >> lg] = 1;
        flags[b >> lg] = 1;
        from = from.min(a);
        to = to.max(b);
    }
    if from == usize::MAX {
        from = 0;
        to = 0;
    }
    Row {
        deltas,
        flags,
        from,
        to,
    }
}

#[test]
fn test_random_rows_match_dense_path() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for &(width, lg) in &[(64usize, 2u32), (100, 3), (256, 5), (517, 4), (1000, 8)] {
        for origin_x in [0i32, -7, 13] {
            let mut dense = MaskAlphaConsumer::with_bounds(lg, origin_x, 0, width, 1).unwrap();
            let mut flagged = MaskAlphaConsumer::with_bounds(lg, origin_x, 0, width, 1).unwrap();
            dense.set_max_alpha(64).unwrap();
            flagged.set_max_alpha(64).unwrap();
            for _ in 0..200 {
                let row = random_row(&mut rng, width, lg, 32);
                let mut dense_deltas = row.deltas.clone();
                let mut flag_deltas = row.deltas;
                let mut flags = row.flags;
                let (from, to) = (origin_x + row.from as i32, origin_x + row.to as i32);

                dense.set_and_clear_relative_alphas(&mut dense_deltas, 0, from, to);
                flagged.set_and_clear_relative_alphas_with_flags(&mut flags, &mut flag_deltas, 0, from, to);

                assert_eq!(dense.row(0), flagged.row(0), "width {} lg {}", width, lg);
                assert!(dense_deltas.iter().all(|&d| d == 0));
                assert!(flag_deltas.iter().all(|&d| d == 0));
                assert!(flags.iter().all(|&f| f == 0));
            }
        }
    }
}

#[test]
fn test_saturated_coverage_matches() {
    let mut dense = MaskAlphaConsumer::with_bounds(4, 0, 0, 128, 1).unwrap();
    let mut flagged = MaskAlphaConsumer::with_bounds(4, 0, 0, 128, 1).unwrap();
    dense.set_max_alpha(16).unwrap();
    flagged.set_max_alpha(16).unwrap();

    let mut deltas = vec![0i32; 130];
    deltas[3] = 40;
    deltas[90] = -40;
    let mut flags = vec![0i32; (130 >> 4) + 2];
    flags[0] = 1;
    flags[90 >> 4] = 1;
    let mut copy = deltas.clone();

    dense.set_and_clear_relative_alphas(&mut deltas, 0, 3, 90);
    flagged.set_and_clear_relative_alphas_with_flags(&mut flags, &mut copy, 0, 3, 90);
    assert_eq!(dense.row(0), flagged.row(0));
    assert_eq!(dense.row(0)[50], 255);
}

fn render_with(config: RasterConfig, path: &Path, style: &RenderStyle) -> Vec<u8> {
    let mut ctx = RendererContext::standalone(config).unwrap();
    let mut mask = ctx.new_mask().unwrap();
    ctx.render(path, style, &mut mask).unwrap();
    mask.into_alphas()
}

fn random_polygon(rng: &mut StdRng, size: f32, points: usize) -> Path {
    let mut path = Path::new();
    path.move_to(rng.random_range(-8.0..size + 8.0), rng.random_range(-8.0..size + 8.0));
    for _ in 1..points {
        path.line_to(rng.random_range(-8.0..size + 8.0), rng.random_range(-8.0..size + 8.0));
    }
    path.close();
    path
}

#[test]
fn test_renderer_output_independent_of_block_flags() {
    let mut rng = StdRng::seed_from_u64(42);
    let always = RasterConfig {
        enable_block_flags: true,
        block_flags_heuristics: false,
        ..RasterConfig::default()
    };
    let never = RasterConfig {
        enable_block_flags: false,
        ..RasterConfig::default()
    };
    let heuristic = RasterConfig::default();

    for i in 0..24 {
        let path = random_polygon(&mut rng, 200.0, 3 + i % 9);
        let clip = PixelBounds::new(0, 0, 200, 120);
        let style = match i % 4 {
            0 => RenderStyle::fill(clip),
            1 => RenderStyle::fill(clip).with_fill_rule(FillRule::EvenOdd),
            2 => RenderStyle::stroke(clip, StrokeStyle::solid(2.5)),
            _ => RenderStyle::fill(clip).with_antialias(false),
        };
        let reference = render_with(never.clone(), &path, &style);
        assert_eq!(render_with(always.clone(), &path, &style), reference, "polygon {}", i);
        assert_eq!(render_with(heuristic.clone(), &path, &style), reference, "polygon {}", i);
    }
}
