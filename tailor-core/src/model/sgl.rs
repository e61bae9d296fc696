// Structural graph learner: one round of mean-neighbour aggregation over the
// embedded nodes, a tanh layer, mean pooling, and a logistic task head.
//
//   m_i = x_i + mean_{j in N(i)} x_j
//   h_i = tanh(W m_i + b)
//   g   = mean_i h_i
//   p   = sigmoid(v . f + c)   f = g                      (per-function tasks)
//                              f = [|g1 - g2|, g1 * g2]   (clone pairs)
//
// Gradients are written out by hand; training is plain SGD on mean BCE.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tailor_graphs::FunctionId;
use tracing::{debug, info};

use super::GraphEncoderModel;
use crate::dataset::Dataset;
use crate::embed::{EmbeddingTable, UNKNOWN_ROW, sigmoid};
use crate::error::{ModelError, StepError};
use crate::types::{Example, Task};

const FORMAT_VERSION: u32 = 1;
const EPS: f32 = 1e-7;

#[derive(Debug, Clone, Copy)]
pub struct SglConfig {
    pub hidden: usize,
    /// Update embedding rows during supervised training.
    pub fine_tune: bool,
    pub seed: u64,
}

/// Node rows and adjacency of one encoded graph, resolved against the table.
#[derive(Debug, Clone)]
struct GraphInput {
    rows: Vec<usize>,
    neighbours: Vec<Vec<usize>>,
}

impl GraphInput {
    fn node_count(&self) -> usize {
        self.rows.len()
    }
}

fn graph_inputs(dataset: &Dataset, table: &EmbeddingTable) -> BTreeMap<FunctionId, GraphInput> {
    dataset
        .graphs
        .iter()
        .map(|(id, graph)| {
            let rows = graph
                .nodes
                .iter()
                .map(|[type_id, token_id, _]| {
                    match (
                        dataset.vocab.node_types.get(*type_id as usize),
                        dataset.vocab.tokens.get(*token_id as usize),
                    ) {
                        (Some(kind), Some(token)) => table.row_of(kind, token),
                        _ => UNKNOWN_ROW,
                    }
                })
                .collect::<Vec<_>>();
            let mut sets = vec![BTreeSet::new(); rows.len()];
            for [src, dst] in graph.all_edges() {
                let (src, dst) = (*src as usize, *dst as usize);
                if src < rows.len() && dst < rows.len() && src != dst {
                    sets[src].insert(dst);
                    sets[dst].insert(src);
                }
            }
            let neighbours = sets.into_iter().map(|s| s.into_iter().collect()).collect();
            (*id, GraphInput { rows, neighbours })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Params {
    /// `hidden x dim`, row-major.
    w: Vec<f32>,
    b: Vec<f32>,
    v: Vec<f32>,
    c: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    format_version: u32,
    task: Task,
    dim: usize,
    hidden: usize,
    epoch: usize,
    saved_at: DateTime<Utc>,
    params: Params,
    /// Present when the embedding was fine-tuned.
    embedding: Option<Vec<Vec<f32>>>,
}

struct Forward {
    m: Vec<Vec<f32>>,
    h: Vec<Vec<f32>>,
    g: Vec<f32>,
}

struct Grads {
    w: Vec<f32>,
    b: Vec<f32>,
    v: Vec<f32>,
    c: f32,
    embedding: BTreeMap<usize, Vec<f32>>,
}

#[derive(Debug)]
pub struct SglModel {
    task: Task,
    config: SglConfig,
    dim: usize,
    embedding: Vec<Vec<f32>>,
    params: Params,
    inputs: BTreeMap<FunctionId, GraphInput>,
    session: bool,
}

impl SglModel {
    /// Xavier-initialised model over the dataset's graphs.
    pub fn new(task: Task, config: SglConfig, table: &EmbeddingTable, dataset: &Dataset) -> Self {
        let dim = table.dim;
        let features = feature_width(task, config.hidden);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let w = xavier(&mut rng, dim, config.hidden, dim * config.hidden);
        let v = xavier(&mut rng, features, 1, features);
        Self {
            task,
            config,
            dim,
            embedding: table.vectors.clone(),
            params: Params {
                w,
                b: vec![0.0; config.hidden],
                v,
                c: 0.0,
            },
            inputs: graph_inputs(dataset, table),
            session: false,
        }
    }

    fn inputs_for(&self, example: &Example) -> Result<Vec<&GraphInput>, StepError> {
        if example.functions.is_empty() {
            return Err(StepError::MalformedExample(example.id.clone()));
        }
        example
            .functions
            .iter()
            .map(|f| self.inputs.get(f).ok_or(StepError::MissingGraph(*f)))
            .collect()
    }

    fn forward_graph(&self, input: &GraphInput) -> Forward {
        let hidden = self.config.hidden;
        let n = input.node_count().max(1);
        let x = |i: usize| self.row(input.rows[i]);

        let mut m = Vec::with_capacity(input.node_count());
        let mut h = Vec::with_capacity(input.node_count());
        let mut g = vec![0.0f32; hidden];
        for i in 0..input.node_count() {
            let mut mi = x(i).to_vec();
            let neighbours = &input.neighbours[i];
            if !neighbours.is_empty() {
                let scale = 1.0 / neighbours.len() as f32;
                for &j in neighbours {
                    for (slot, xj) in mi.iter_mut().zip(x(j)) {
                        *slot += scale * xj;
                    }
                }
            }
            let hi: Vec<f32> = (0..hidden)
                .map(|k| {
                    let row = &self.params.w[k * self.dim..(k + 1) * self.dim];
                    (self.params.b[k] + dot(row, &mi)).tanh()
                })
                .collect();
            for (slot, value) in g.iter_mut().zip(&hi) {
                *slot += value / n as f32;
            }
            m.push(mi);
            h.push(hi);
        }
        Forward { m, h, g }
    }

    fn row(&self, row: usize) -> &[f32] {
        self.embedding
            .get(row)
            .or_else(|| self.embedding.get(UNKNOWN_ROW))
            .map_or(&[][..], Vec::as_slice)
    }

    fn features(&self, gs: &[&[f32]]) -> Vec<f32> {
        if self.task.is_pairwise() {
            let (a, b) = (gs[0], gs.get(1).copied().unwrap_or(gs[0]));
            a.iter()
                .zip(b)
                .map(|(x, y)| (x - y).abs())
                .chain(a.iter().zip(b).map(|(x, y)| x * y))
                .collect()
        } else {
            gs[0].to_vec()
        }
    }

    /// d(loss)/d(g) for each graph, given d(loss)/d(features).
    fn feature_grads(&self, gs: &[&[f32]], df: &[f32]) -> Vec<Vec<f32>> {
        if !self.task.is_pairwise() {
            return vec![df.to_vec()];
        }
        let hidden = self.config.hidden;
        let (a, b) = (gs[0], gs.get(1).copied().unwrap_or(gs[0]));
        let mut da = vec![0.0f32; hidden];
        let mut db = vec![0.0f32; hidden];
        for k in 0..hidden {
            let sign = (a[k] - b[k]).signum();
            da[k] += df[k] * sign + df[hidden + k] * b[k];
            db[k] += -df[k] * sign + df[hidden + k] * a[k];
        }
        if gs.len() > 1 { vec![da, db] } else { vec![da] }
    }

    fn backward_graph(&self, input: &GraphInput, fwd: &Forward, dg: &[f32], grads: &mut Grads) {
        let hidden = self.config.hidden;
        let n = input.node_count().max(1) as f32;
        for i in 0..input.node_count() {
            let da: Vec<f32> = (0..hidden)
                .map(|k| dg[k] / n * (1.0 - fwd.h[i][k] * fwd.h[i][k]))
                .collect();
            for k in 0..hidden {
                grads.b[k] += da[k];
                let row = &mut grads.w[k * self.dim..(k + 1) * self.dim];
                for (slot, mi) in row.iter_mut().zip(&fwd.m[i]) {
                    *slot += da[k] * mi;
                }
            }
            if !self.config.fine_tune {
                continue;
            }
            let dm: Vec<f32> = (0..self.dim)
                .map(|l| (0..hidden).map(|k| self.params.w[k * self.dim + l] * da[k]).sum())
                .collect();
            self.accumulate_row(grads, input.rows[i], &dm, 1.0);
            let neighbours = &input.neighbours[i];
            if !neighbours.is_empty() {
                let scale = 1.0 / neighbours.len() as f32;
                for &j in neighbours {
                    self.accumulate_row(grads, input.rows[j], &dm, scale);
                }
            }
        }
    }

    fn accumulate_row(&self, grads: &mut Grads, row: usize, delta: &[f32], scale: f32) {
        if row == UNKNOWN_ROW {
            return;
        }
        let slot = grads
            .embedding
            .entry(row)
            .or_insert_with(|| vec![0.0; self.dim]);
        for (s, d) in slot.iter_mut().zip(delta) {
            *s += scale * d;
        }
    }

    fn zero_grads(&self) -> Grads {
        Grads {
            w: vec![0.0; self.params.w.len()],
            b: vec![0.0; self.params.b.len()],
            v: vec![0.0; self.params.v.len()],
            c: 0.0,
            embedding: BTreeMap::new(),
        }
    }

    fn apply(&mut self, grads: &Grads, step: f32) {
        for (p, g) in self.params.w.iter_mut().zip(&grads.w) {
            *p -= step * g;
        }
        for (p, g) in self.params.b.iter_mut().zip(&grads.b) {
            *p -= step * g;
        }
        for (p, g) in self.params.v.iter_mut().zip(&grads.v) {
            *p -= step * g;
        }
        self.params.c -= step * grads.c;
        for (row, g) in &grads.embedding {
            if let Some(vector) = self.embedding.get_mut(*row) {
                for (p, d) in vector.iter_mut().zip(g) {
                    *p -= step * d;
                }
            }
        }
    }

    fn score(&self, example: &Example) -> Result<(f32, Vec<Forward>, Vec<f32>), StepError> {
        let inputs = self.inputs_for(example)?;
        let forwards: Vec<Forward> = inputs.iter().map(|i| self.forward_graph(i)).collect();
        let gs: Vec<&[f32]> = forwards.iter().map(|f| f.g.as_slice()).collect();
        let features = self.features(&gs);
        let p = sigmoid(dot(&self.params.v, &features) + self.params.c);
        Ok((p, forwards, features))
    }

    /// Embedding rows as currently held by the model.
    pub fn embedding(&self) -> &[Vec<f32>] {
        &self.embedding
    }
}

impl GraphEncoderModel for SglModel {
    fn task(&self) -> Task {
        self.task
    }

    fn open_session(&mut self) -> Result<(), ModelError> {
        if self.session {
            return Err(ModelError::Incompatible("a session is already open".to_string()));
        }
        self.session = true;
        debug!(task = %self.task, "Model session opened");
        Ok(())
    }

    fn close_session(&mut self) {
        if self.session {
            self.session = false;
            debug!(task = %self.task, "Model session closed");
        }
    }

    fn session_open(&self) -> bool {
        self.session
    }

    fn train_step(&mut self, batch: &[Example], learning_rate: f32) -> Result<f32, StepError> {
        if !self.session {
            return Err(StepError::SessionClosed);
        }
        if batch.is_empty() {
            return Err(StepError::EmptyBatch);
        }

        let mut grads = self.zero_grads();
        let mut loss = 0.0f32;
        for example in batch {
            let (p, forwards, features) = self.score(example)?;
            let y = f32::from(example.label);
            let clamped = p.clamp(EPS, 1.0 - EPS);
            loss -= y * clamped.ln() + (1.0 - y) * (1.0 - clamped).ln();

            let dz = p - y;
            for (g, f) in grads.v.iter_mut().zip(&features) {
                *g += dz * f;
            }
            grads.c += dz;
            let df: Vec<f32> = self.params.v.iter().map(|v| v * dz).collect();
            let gs: Vec<&[f32]> = forwards.iter().map(|f| f.g.as_slice()).collect();
            let dgs = self.feature_grads(&gs, &df);

            let inputs = self.inputs_for(example)?;
            for ((input, fwd), dg) in inputs.iter().zip(&forwards).zip(&dgs) {
                self.backward_graph(input, fwd, dg, &mut grads);
            }
        }

        let n = batch.len() as f32;
        self.apply(&grads, learning_rate / n);
        Ok(loss / n)
    }

    fn predict(&self, example: &Example) -> Result<f32, StepError> {
        self.score(example).map(|(p, _, _)| p)
    }

    fn save(&self, path: &Path, epoch: usize) -> Result<(), ModelError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let checkpoint = Checkpoint {
            format_version: FORMAT_VERSION,
            task: self.task,
            dim: self.dim,
            hidden: self.config.hidden,
            epoch,
            saved_at: Utc::now(),
            params: self.params.clone(),
            embedding: self.config.fine_tune.then(|| self.embedding.clone()),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&serde_json::to_vec(&checkpoint)?)?;
        tmp.persist(path).map_err(|e| ModelError::Io(e.error))?;
        info!(path = %path.display(), epoch, "Saved checkpoint");
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<usize, ModelError> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ModelError::CheckpointNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
        if checkpoint.format_version != FORMAT_VERSION
            || checkpoint.task != self.task
            || checkpoint.dim != self.dim
            || checkpoint.hidden != self.config.hidden
        {
            return Err(ModelError::Incompatible(format!(
                "checkpoint is {} dim={} hidden={}, model is {} dim={} hidden={}",
                checkpoint.task, checkpoint.dim, checkpoint.hidden, self.task, self.dim, self.config.hidden
            )));
        }
        if let Some(embedding) = checkpoint.embedding {
            if embedding.len() != self.embedding.len() {
                return Err(ModelError::Incompatible(format!(
                    "checkpoint embedding has {} rows, table has {}",
                    embedding.len(),
                    self.embedding.len()
                )));
            }
            self.embedding = embedding;
        }
        self.params = checkpoint.params;
        info!(path = %path.display(), epoch = checkpoint.epoch, "Loaded checkpoint");
        Ok(checkpoint.epoch)
    }
}

fn feature_width(task: Task, hidden: usize) -> usize {
    if task.is_pairwise() { 2 * hidden } else { hidden }
}

fn xavier(rng: &mut StdRng, fan_in: usize, fan_out: usize, len: usize) -> Vec<f32> {
    let a = (6.0 / (fan_in + fan_out) as f32).sqrt();
    (0..len).map(|_| rng.gen_range(-a..a)).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
