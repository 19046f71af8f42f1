//! Random edits of organisms.
//!
//! Every mutation is expressed as a single [`PatchOperation`] plus the
//! canvas rectangles it can change, which is what incremental scoring
//! re-renders.

use image::RgbaImage;
use rand::prelude::*;

use crate::compute::{
    Circle, Instruction, InstructionKind, Line, Polygon, Polypoint, Rect, Rgba,
};
use crate::schema::MutationConfig;

use super::{Organism, PatchOperation};

/// Proposals drawn before a focus threshold gives up and keeps the last one.
const MAX_FOCUS_ATTEMPTS: usize = 1000;

/// Wrap `value` into the inclusive domain `[min, max]`.
pub fn wrap(value: f32, min: f32, max: f32) -> f32 {
    let range = max - min;
    if !(range > 0.0) || !value.is_finite() {
        return min;
    }
    if (min..=max).contains(&value) {
        return value;
    }
    (min + (value - min).rem_euclid(range)).clamp(min, max)
}

/// Add a random delta from `delta` to `value`, wrapping into `[min, max]`.
pub fn mutate_value<R: Rng>(rng: &mut R, min: f32, max: f32, delta: (f32, f32), value: f32) -> f32 {
    wrap(value + uniform(rng, delta), min, max)
}

fn uniform<R: Rng>(rng: &mut R, (lo, hi): (f32, f32)) -> f32 {
    if hi > lo { rng.gen_range(lo..hi) } else { lo }
}

/// Focus weighting raster. Higher values attract more mutations.
#[derive(Debug, Clone)]
pub struct FocusMap {
    width: u32,
    height: u32,
    values: Vec<u8>,
    max: u8,
}

impl FocusMap {
    /// Build from the red channel of an image.
    pub fn from_image(image: &RgbaImage) -> Self {
        let values: Vec<u8> = image.pixels().map(|p| p.0[0]).collect();
        let max = values.iter().copied().max().unwrap_or(0);
        Self {
            width: image.width(),
            height: image.height(),
            values,
            max,
        }
    }

    /// Value at canvas coordinates, clamped onto the raster.
    pub fn value_at(&self, x: f32, y: f32) -> u8 {
        if self.values.is_empty() {
            return 0;
        }
        let x = (x.max(0.0) as u32).min(self.width - 1);
        let y = (y.max(0.0) as u32).min(self.height - 1);
        self.values[(y * self.width + x) as usize]
    }

    pub fn max(&self) -> u8 {
        self.max
    }
}

/// A proposed edit and the regions it touches.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub operation: PatchOperation,
    pub affected: Vec<Rect>,
}

/// Produces random instructions and single-operation mutations.
pub struct Mutator {
    config: MutationConfig,
    kinds: Vec<InstructionKind>,
    width: f32,
    height: f32,
    focus: Option<FocusMap>,
    rng: StdRng,
}

impl Mutator {
    pub fn new(config: MutationConfig, kinds: Vec<InstructionKind>, width: u32, height: u32) -> Self {
        Self {
            config,
            kinds,
            width: width as f32,
            height: height as f32,
            focus: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Use a fixed RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_focus(mut self, focus: Option<FocusMap>) -> Self {
        self.focus = focus.filter(|f| f.max() > 0);
        self
    }

    /// Propose one mutation of `organism`, resampling against the focus map
    /// when one is set.
    pub fn mutate(&mut self, organism: &Organism) -> Mutation {
        let Some(focus) = self.focus.take() else {
            return self.propose(organism);
        };
        let threshold = self.rng.gen_range(0..focus.max());
        let mut mutation = self.propose(organism);
        for _ in 1..MAX_FOCUS_ATTEMPTS {
            let hit = mutation.affected.iter().any(|rect| {
                let (x, y) = rect.center();
                focus.value_at(x, y) >= threshold
            });
            if hit {
                break;
            }
            mutation = self.propose(organism);
        }
        self.focus = Some(focus);
        mutation
    }

    fn propose(&mut self, organism: &Organism) -> Mutation {
        let instructions = organism.instructions();
        let len = instructions.len();
        let choice = if len == 0 { 0 } else { self.rng.gen_range(0..5) };
        match choice {
            1 => {
                let mut clone = instructions[self.rng.gen_range(0..len)].clone();
                self.mutate_instruction(&mut clone);
                let affected = vec![clone.bounds()];
                Mutation {
                    operation: PatchOperation::Append(clone),
                    affected,
                }
            }
            2 => {
                let victim = &instructions[self.rng.gen_range(0..len)];
                Mutation {
                    operation: PatchOperation::Delete(victim.hash()),
                    affected: vec![victim.bounds()],
                }
            }
            3 => {
                let old = &instructions[self.rng.gen_range(0..len)];
                let mut replacement = old.clone();
                self.mutate_instruction(&mut replacement);
                let affected = vec![old.bounds(), replacement.bounds()];
                Mutation {
                    operation: PatchOperation::Replace {
                        old: old.hash(),
                        instruction: replacement,
                    },
                    affected,
                }
            }
            4 if len >= 2 => {
                let i = self.rng.gen_range(0..len);
                let mut j = self.rng.gen_range(0..len - 1);
                if j >= i {
                    j += 1;
                }
                let (a, b) = (&instructions[i], &instructions[j]);
                Mutation {
                    operation: PatchOperation::Swap(a.hash(), b.hash()),
                    affected: vec![a.bounds(), b.bounds()],
                }
            }
            _ => {
                let instruction = self.random_instruction();
                let affected = vec![instruction.bounds()];
                Mutation {
                    operation: PatchOperation::Append(instruction),
                    affected,
                }
            }
        }
    }

    /// Synthesize an organism with a random instruction count in `[min, max]`.
    pub fn random_organism(&mut self, min: usize, max: usize) -> Organism {
        let count = if max > min { self.rng.gen_range(min..=max) } else { min };
        Organism::new((0..count).map(|_| self.random_instruction()).collect())
    }

    /// A random instruction of one of the enabled kinds.
    pub fn random_instruction(&mut self) -> Instruction {
        let kind = self
            .kinds
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(InstructionKind::Circle);
        let color = self.random_color();
        let (x, y) = self.random_point();
        let cfg = &self.config;
        match kind {
            InstructionKind::Line => {
                let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
                // Short lines are more useful than long ones.
                let mut length = self.rng.gen_range(1.0..=cfg.max_line_length.max(1.0))
                    * self.rng.gen_range(0.0f32..=1.0);
                let width = uniform(&mut self.rng, (0.1, cfg.max_line_width));
                while length * width > cfg.max_line_area && length > 1.0 {
                    length *= 0.95;
                }
                Instruction::Line(Line {
                    start_x: x,
                    start_y: y,
                    end_x: x + length * angle.cos(),
                    end_y: y + length * angle.sin(),
                    width,
                    color,
                })
            }
            InstructionKind::Circle => Instruction::Circle(Circle {
                x,
                y,
                radius: uniform(&mut self.rng, (1.0, cfg.max_circle_radius)),
                color,
            }),
            InstructionKind::Polygon => {
                let (min_points, max_points) = cfg.polygon_points;
                let bounds = cfg.polygon_radius_bounds;
                let count = self.rng.gen_range(min_points..=max_points.max(min_points));
                let points = (0..count)
                    .map(|_| Polypoint {
                        distance: uniform(&mut self.rng, bounds),
                        angle: self.rng.gen_range(0.0..360.0),
                    })
                    .collect();
                let mut polygon = Polygon {
                    x,
                    y,
                    points,
                    color,
                };
                polygon.sort_points();
                Instruction::Polygon(polygon)
            }
        }
    }

    fn random_color(&mut self) -> Rgba {
        Rgba::opaque(self.rng.r#gen(), self.rng.r#gen(), self.rng.r#gen())
    }

    fn random_point(&mut self) -> (f32, f32) {
        (
            uniform(&mut self.rng, (0.0, self.width)),
            uniform(&mut self.rng, (0.0, self.height)),
        )
    }

    /// Perturb one property of `instruction` in place.
    pub fn mutate_instruction(&mut self, instruction: &mut Instruction) {
        // Choice 0 is always a color change.
        let options = match instruction {
            Instruction::Line(_) => 4,
            Instruction::Circle(_) => 3,
            Instruction::Polygon(_) => 5,
        };
        let choice = self.rng.gen_range(0..options);
        if choice == 0 {
            self.mutate_color(instruction.color_mut());
            return;
        }
        let cfg = self.config.clone();
        let (w, h) = (self.width, self.height);
        let rng = &mut self.rng;
        match instruction {
            Instruction::Line(line) => match choice {
                1 => {
                    line.start_x = mutate_value(rng, 0.0, w, cfg.coordinate, line.start_x);
                    line.start_y = mutate_value(rng, 0.0, h, cfg.coordinate, line.start_y);
                }
                2 => {
                    line.end_x = mutate_value(rng, 0.0, w, cfg.coordinate, line.end_x);
                    line.end_y = mutate_value(rng, 0.0, h, cfg.coordinate, line.end_y);
                }
                _ => {
                    line.width =
                        mutate_value(rng, 0.1, cfg.max_line_width, cfg.line_width, line.width);
                }
            },
            Instruction::Circle(circle) => match choice {
                1 => {
                    circle.x = mutate_value(rng, 0.0, w, cfg.coordinate, circle.x);
                    circle.y = mutate_value(rng, 0.0, h, cfg.coordinate, circle.y);
                }
                _ => {
                    circle.radius = mutate_value(
                        rng,
                        1.0,
                        cfg.max_circle_radius,
                        cfg.circle_radius,
                        circle.radius,
                    );
                }
            },
            Instruction::Polygon(polygon) => {
                let (min_points, max_points) = cfg.polygon_points;
                let (min_radius, max_radius) = cfg.polygon_radius_bounds;
                match choice {
                    1 => {
                        polygon.x = mutate_value(rng, 0.0, w, cfg.coordinate, polygon.x);
                        polygon.y = mutate_value(rng, 0.0, h, cfg.coordinate, polygon.y);
                    }
                    2 if !polygon.points.is_empty() => {
                        let idx = rng.gen_range(0..polygon.points.len());
                        let point = &mut polygon.points[idx];
                        point.distance = mutate_value(
                            rng,
                            min_radius,
                            max_radius,
                            cfg.polygon_radius,
                            point.distance,
                        );
                    }
                    3 if !polygon.points.is_empty() => {
                        let idx = rng.gen_range(0..polygon.points.len());
                        let point = &mut polygon.points[idx];
                        point.angle = mutate_value(rng, 0.0, 360.0, cfg.polygon_angle, point.angle);
                    }
                    _ => {
                        let grow = polygon.points.len() <= min_points
                            || (polygon.points.len() < max_points && rng.gen_bool(0.5));
                        if grow {
                            polygon.points.push(Polypoint {
                                distance: uniform(rng, (min_radius, max_radius)),
                                angle: rng.gen_range(0.0..360.0),
                            });
                        } else if !polygon.points.is_empty() {
                            let idx = rng.gen_range(0..polygon.points.len());
                            polygon.points.remove(idx);
                        }
                    }
                }
                polygon.sort_points();
            }
        }
    }

    fn mutate_color(&mut self, color: &mut Rgba) {
        let (h, s, l) = color.to_hsl();
        let cfg = &self.config;
        let (h, s, l) = match self.rng.gen_range(0..3) {
            0 => (mutate_value(&mut self.rng, 0.0, 360.0, cfg.hue, h), s, l),
            1 => (h, mutate_value(&mut self.rng, 0.0, 1.0, cfg.saturation, s), l),
            _ => (h, s, mutate_value(&mut self.rng, 0.0, 1.0, cfg.lightness, l)),
        };
        *color = Rgba::from_hsl(h, s, l, color.a);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mutator() -> Mutator {
        Mutator::new(
            MutationConfig::default(),
            vec![
                InstructionKind::Line,
                InstructionKind::Circle,
                InstructionKind::Polygon,
            ],
            64,
            48,
        )
        .with_seed(7)
    }

    #[test]
    fn test_wraparound_past_max() {
        assert_eq!(wrap(370.0, 0.0, 360.0), 10.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(mutate_value(&mut rng, 0.0, 360.0, (20.0, 20.0), 350.0), 10.0);
    }

    #[test]
    fn test_wraparound_below_min() {
        assert_eq!(wrap(-5.0, 0.0, 360.0), 355.0);
        assert_eq!(wrap(360.0, 0.0, 360.0), 360.0);
    }

    #[test]
    fn test_wrap_huge_values() {
        for value in [1e30, -1e30, f32::MAX, f32::MIN] {
            let wrapped = wrap(value, 0.0, 360.0);
            assert!((0.0..=360.0).contains(&wrapped), "{value} -> {wrapped}");
        }
    }

    #[test]
    fn test_mutate_instruction_with_huge_coordinates() {
        let mut mutator = mutator();
        let mut instruction = Instruction::Circle(Circle {
            x: 1e30,
            y: 1e30,
            radius: 1e30,
            color: Rgba::opaque(1, 2, 3),
        });
        for _ in 0..50 {
            mutator.mutate_instruction(&mut instruction);
        }
        let Instruction::Circle(circle) = &instruction else {
            panic!("kind changed");
        };
        assert!(circle.x.is_finite() && circle.y.is_finite());
    }

    proptest! {
        #[test]
        fn test_mutated_value_stays_in_domain(
            value in 0.0f32..=100.0,
            delta in -250.0f32..250.0,
        ) {
            let wrapped = wrap(value + delta, 0.0, 100.0);
            prop_assert!((0.0..=100.0).contains(&wrapped));
        }
    }

    #[test]
    fn test_empty_organism_gets_append() {
        let mut mutator = mutator();
        let organism = Organism::new(Vec::new());
        for _ in 0..20 {
            let mutation = mutator.mutate(&organism);
            assert!(matches!(mutation.operation, PatchOperation::Append(_)));
            assert_eq!(mutation.affected.len(), 1);
        }
    }

    #[test]
    fn test_mutation_changes_hash() {
        let mut mutator = mutator();
        let organism = mutator.random_organism(5, 10);
        let mut changed = 0;
        for _ in 0..50 {
            let mutation = mutator.mutate(&organism);
            let mut child = organism.clone_genome();
            child.apply_operations(std::slice::from_ref(&mutation.operation));
            if child.hash() != organism.hash() {
                changed += 1;
            }
        }
        assert!(changed > 40);
    }

    #[test]
    fn test_random_instructions_respect_limits() {
        let mut mutator = mutator();
        let cfg = MutationConfig::default();
        for _ in 0..200 {
            match mutator.random_instruction() {
                Instruction::Line(line) => {
                    let length = (line.end_x - line.start_x).hypot(line.end_y - line.start_y);
                    assert!(length * line.width <= cfg.max_line_area + 1e-3 || length <= 1.0);
                }
                Instruction::Circle(circle) => assert!(circle.radius <= cfg.max_circle_radius),
                Instruction::Polygon(polygon) => {
                    let n = polygon.points.len();
                    assert!(n >= cfg.polygon_points.0 && n <= cfg.polygon_points.1);
                    assert!(polygon.points.windows(2).all(|w| w[0].angle <= w[1].angle));
                }
            }
        }
    }

    #[test]
    fn test_focus_biases_toward_hot_region() {
        // Only the left column of tiles is in focus.
        let focus = RgbaImage::from_fn(64, 48, |x, _| {
            image::Rgba([if x < 16 { 255 } else { 0 }, 0, 0, 255])
        });
        let mut mutator = mutator().with_focus(Some(FocusMap::from_image(&focus)));
        let organism = Organism::new(Vec::new());
        // A zero threshold accepts anything, so allow a few strays.
        let hits = (0..20)
            .filter(|_| mutator.mutate(&organism).affected[0].center().0 < 16.0)
            .count();
        assert!(hits >= 17, "only {hits} of 20 mutations in focus");
    }
}
