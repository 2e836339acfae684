//! Tree-walking interpreter.
//!
//! Buffers live in an arena of [`Tensor`]s. Names are resolved through a
//! chain of scopes: each block opens a scope, and a loop body's scope binds
//! the loop variable. A template call runs the template body in a fresh
//! root scope whose parameters are views into the caller's tensors, so the
//! template sees exactly the windows it was passed.

use std::collections::BTreeMap;

use loopcraft_ir::{BinOp, Block, BufferDecl, Expr, Param, Proc, Stmt, TemplateLookup, Window, WindowDim};

use crate::error::{EvalError, EvalResult};
use crate::tensor::Tensor;

/// Sizes and buffers passed to a kernel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Args {
    pub sizes: BTreeMap<String, i64>,
    pub buffers: BTreeMap<String, Tensor>,
}

impl Args {
    /// Allocate every buffer parameter of `proc` for the given sizes,
    /// filling elements with `fill(param, flat_offset)`.
    pub fn for_proc(
        proc: &Proc,
        sizes: &BTreeMap<String, i64>,
        mut fill: impl FnMut(&BufferDecl, usize) -> f64,
    ) -> EvalResult<Args> {
        for name in proc.sizes() {
            if !sizes.contains_key(name) {
                return Err(EvalError::MissingSize { name: name.to_owned() });
            }
        }
        let env = Env::root(
            sizes
                .iter()
                .map(|(name, &v)| (name.clone(), Binding::Index(v)))
                .collect(),
        );
        let mut buffers = BTreeMap::new();
        for decl in proc.buffer_params() {
            let shape = shape_of(&env, decl)?;
            let tensor = Tensor::from_fn(decl.ty, shape, |i| fill(decl, i));
            buffers.insert(decl.name.clone(), tensor);
        }
        Ok(Args {
            sizes: sizes.clone(),
            buffers,
        })
    }
}

/// Executes kernels. Template calls need a template lookup.
#[derive(Clone, Copy, Default)]
pub struct Interpreter<'t> {
    templates: Option<&'t dyn TemplateLookup>,
}

impl<'t> Interpreter<'t> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_templates(templates: &'t dyn TemplateLookup) -> Self {
        Interpreter {
            templates: Some(templates),
        }
    }

    /// Run `proc` on `args`, updating buffers in place.
    ///
    /// Buffers keep whatever was written before an error.
    pub fn run(&self, proc: &Proc, args: &mut Args) -> EvalResult<()> {
        let mut bindings = BTreeMap::new();
        let mut arena = Vec::new();
        let mut taken = Vec::new();
        let mut result = Ok(());
        for p in &proc.params {
            match p {
                Param::Size(name) => {
                    let Some(&value) = args.sizes.get(name) else {
                        result = Err(EvalError::MissingSize { name: name.clone() });
                        break;
                    };
                    if value < 1 {
                        result = Err(EvalError::InvalidSize {
                            name: name.clone(),
                            value,
                        });
                        break;
                    }
                    bindings.insert(name.clone(), Binding::Index(value));
                }
                Param::Buffer(decl) => {
                    let env = Env::root(bindings.clone());
                    let expected = match shape_of(&env, decl) {
                        Ok(shape) => shape,
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    };
                    let Some(tensor) = args.buffers.remove(&decl.name) else {
                        result = Err(EvalError::MissingBuffer {
                            name: decl.name.clone(),
                        });
                        break;
                    };
                    if tensor.shape != expected || tensor.ty != decl.ty {
                        result = Err(EvalError::ShapeMismatch {
                            buffer: decl.name.clone(),
                            expected: format!("{}{:?}", decl.ty, expected),
                            found: format!("{}{:?}", tensor.ty, tensor.shape),
                        });
                        args.buffers.insert(decl.name.clone(), tensor);
                        break;
                    }
                    bindings.insert(decl.name.clone(), Binding::Buffer(View::whole(arena.len(), &decl.name, &tensor)));
                    taken.push(decl.name.clone());
                    arena.push(tensor);
                }
            }
        }
        if result.is_ok() {
            tracing::debug!(kernel = %proc.name, "interpreting");
            let mut machine = Machine {
                templates: self.templates,
                arena,
            };
            result = machine.block(&Env::root(bindings), &proc.body, Vec::new());
            arena = machine.arena;
        }
        // Hand the parameter tensors back; they are the first arena slots.
        for (name, tensor) in taken.into_iter().zip(arena) {
            args.buffers.insert(name, tensor);
        }
        result
    }
}

fn shape_of(env: &Env<'_>, decl: &BufferDecl) -> EvalResult<Vec<usize>> {
    decl.shape
        .iter()
        .map(|e| {
            let n = index(env, e)?;
            usize::try_from(n).map_err(|_| EvalError::ShapeMismatch {
                buffer: decl.name.clone(),
                expected: "a non-negative extent".into(),
                found: n.to_string(),
            })
        })
        .collect()
}

#[derive(Clone, Debug)]
enum Binding {
    Index(i64),
    Buffer(View),
}

/// One dimension of a view: fixed to a coordinate, or a free range.
#[derive(Clone, Debug)]
enum ViewDim {
    Fixed(i64),
    Free { offset: i64, extent: i64 },
}

/// A window into an arena tensor.
#[derive(Clone, Debug)]
struct View {
    tensor: usize,
    /// Name of the underlying buffer, for error messages.
    name: String,
    dims: Vec<ViewDim>,
}

impl View {
    fn whole(tensor: usize, name: &str, t: &Tensor) -> Self {
        View {
            tensor,
            name: name.to_owned(),
            dims: t
                .shape
                .iter()
                .map(|&n| ViewDim::Free {
                    offset: 0,
                    extent: n as i64,
                })
                .collect(),
        }
    }

    fn rank(&self) -> usize {
        self.dims
            .iter()
            .filter(|d| matches!(d, ViewDim::Free { .. }))
            .count()
    }

    /// Coordinates in the underlying tensor of `index`, checked against
    /// the view's extents.
    fn coordinates(&self, index: &[i64]) -> EvalResult<Vec<i64>> {
        let out_of_bounds = || EvalError::OutOfBounds {
            buffer: self.name.clone(),
            index: format!("{index:?}"),
        };
        if index.len() != self.rank() {
            return Err(out_of_bounds());
        }
        let mut free = index.iter();
        let mut coords = Vec::with_capacity(self.dims.len());
        for d in &self.dims {
            match *d {
                ViewDim::Fixed(c) => coords.push(c),
                ViewDim::Free { offset, extent } => {
                    let &i = free.next().ok_or_else(out_of_bounds)?;
                    if i < 0 || i >= extent {
                        return Err(out_of_bounds());
                    }
                    coords.push(offset + i);
                }
            }
        }
        Ok(coords)
    }
}

struct Env<'p> {
    parent: Option<&'p Env<'p>>,
    bindings: BTreeMap<String, Binding>,
}

impl Env<'_> {
    fn root(bindings: BTreeMap<String, Binding>) -> Env<'static> {
        Env {
            parent: None,
            bindings,
        }
    }

    fn lookup(&self, name: &str) -> EvalResult<&Binding> {
        match self.bindings.get(name) {
            Some(b) => Ok(b),
            None => match self.parent {
                Some(parent) => parent.lookup(name),
                None => Err(EvalError::UnknownName { name: name.to_owned() }),
            },
        }
    }

    fn bind(&mut self, name: String, binding: Binding) {
        self.bindings.insert(name, binding);
    }

    fn child(&self, bindings: impl IntoIterator<Item = (String, Binding)>) -> Env<'_> {
        Env {
            parent: Some(self),
            bindings: bindings.into_iter().collect(),
        }
    }

    fn view(&self, name: &str) -> EvalResult<&View> {
        match self.lookup(name)? {
            Binding::Buffer(v) => Ok(v),
            Binding::Index(_) => Err(EvalError::unsupported(format!("`{name}` is not a buffer"))),
        }
    }
}

struct Machine<'t> {
    templates: Option<&'t dyn TemplateLookup>,
    arena: Vec<Tensor>,
}

impl Machine<'_> {
    fn block(&mut self, env: &Env<'_>, block: &Block, bindings: Vec<(String, Binding)>) -> EvalResult<()> {
        let mut scope = env.child(bindings);
        let mark = self.arena.len();
        let result = block.iter().try_for_each(|stmt| self.stmt(&mut scope, stmt));
        // Allocations die with their block.
        self.arena.truncate(mark);
        result
    }

    fn stmt(&mut self, env: &mut Env<'_>, stmt: &Stmt) -> EvalResult<()> {
        match stmt {
            Stmt::Loop(l) => {
                let n = index(env, &l.bound)?;
                for k in 0..n {
                    self.block(env, &l.body, vec![(l.var.clone(), Binding::Index(k))])?;
                }
                Ok(())
            }
            Stmt::If(i) => {
                if cond(env, &i.cond)? {
                    self.block(env, &i.body, Vec::new())?;
                }
                Ok(())
            }
            Stmt::Assign(a) => {
                let value = self.data(env, &a.rhs)?;
                self.store(env, &a.buf, &a.idx, |_| value)
            }
            Stmt::Reduce(a) => {
                let value = self.data(env, &a.rhs)?;
                self.store(env, &a.buf, &a.idx, |old| old + value)
            }
            Stmt::Alloc(decl) => {
                let shape = shape_of(env, decl)?;
                let len = shape.iter().product();
                let tensor = Tensor {
                    ty: decl.ty,
                    shape,
                    data: vec![f64::NAN; len],
                };
                let view = View::whole(self.arena.len(), &decl.name, &tensor);
                self.arena.push(tensor);
                env.bind(decl.name.clone(), Binding::Buffer(view));
                Ok(())
            }
            Stmt::Call(call) => {
                let templates = self
                    .templates
                    .ok_or_else(|| EvalError::UnknownTemplate {
                        name: call.template.clone(),
                    })?;
                let template = templates
                    .template(&call.template)
                    .ok_or_else(|| EvalError::UnknownTemplate {
                        name: call.template.clone(),
                    })?;
                if template.params.len() != call.args.len() {
                    return Err(EvalError::unsupported(format!(
                        "`{}` called with {} arguments",
                        call.template,
                        call.args.len()
                    )));
                }
                let mut bindings = BTreeMap::new();
                for (param, window) in template.params.iter().zip(&call.args) {
                    let view = window_view(env, window)?;
                    bindings.insert(param.name().to_owned(), Binding::Buffer(view));
                }
                tracing::trace!(template = %call.template, "call");
                self.block(&Env::root(bindings), &template.body, Vec::new())
            }
        }
    }

    fn load(&self, env: &Env<'_>, buf: &str, idx: &[Expr]) -> EvalResult<f64> {
        let view = env.view(buf)?;
        let point = idx.iter().map(|e| index(env, e)).collect::<EvalResult<Vec<_>>>()?;
        let coords = view.coordinates(&point)?;
        self.arena
            .get(view.tensor)
            .and_then(|t| t.get(&coords))
            .ok_or_else(|| EvalError::OutOfBounds {
                buffer: view.name.clone(),
                index: format!("{coords:?}"),
            })
    }

    fn store(&mut self, env: &Env<'_>, buf: &str, idx: &[Expr], f: impl FnOnce(f64) -> f64) -> EvalResult<()> {
        let view = env.view(buf)?;
        let point = idx.iter().map(|e| index(env, e)).collect::<EvalResult<Vec<_>>>()?;
        let coords = view.coordinates(&point)?;
        let out_of_bounds = || EvalError::OutOfBounds {
            buffer: view.name.clone(),
            index: format!("{coords:?}"),
        };
        let tensor = self.arena.get_mut(view.tensor).ok_or_else(out_of_bounds)?;
        let old = tensor.get(&coords).ok_or_else(out_of_bounds)?;
        if tensor.set(&coords, f(old)) {
            Ok(())
        } else {
            Err(out_of_bounds())
        }
    }

    fn data(&self, env: &Env<'_>, e: &Expr) -> EvalResult<f64> {
        Ok(match e {
            Expr::Var(_) | Expr::Int(_) => index(env, e)? as f64,
            Expr::Float(v) => *v,
            Expr::Read(buf, idx) => self.load(env, buf, idx)?,
            Expr::Binary(op, l, r) => {
                let l = self.data(env, l)?;
                let r = self.data(env, r)?;
                match op {
                    BinOp::Add => l + r,
                    BinOp::Sub => l - r,
                    BinOp::Mul => l * r,
                    BinOp::Div => l / r,
                    BinOp::Mod => l.rem_euclid(r),
                    _ => return Err(EvalError::unsupported(format!("`{e}` as a value"))),
                }
            }
            Expr::Neg(x) => -self.data(env, x)?,
        })
    }
}

fn index(env: &Env<'_>, e: &Expr) -> EvalResult<i64> {
    Ok(match e {
        Expr::Var(v) => match env.lookup(v)? {
            Binding::Index(n) => *n,
            Binding::Buffer(_) => return Err(EvalError::unsupported(format!("buffer `{v}` as an index"))),
        },
        Expr::Int(n) => *n,
        Expr::Binary(op, l, r) => {
            let l = index(env, l)?;
            let r = index(env, r)?;
            let zero = || EvalError::DivisionByZero { expr: e.to_string() };
            match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => l.checked_div_euclid(r).ok_or_else(zero)?,
                BinOp::Mod => l.checked_rem_euclid(r).ok_or_else(zero)?,
                _ => return Err(EvalError::unsupported(format!("`{e}` as an index"))),
            }
        }
        Expr::Neg(x) => -index(env, x)?,
        Expr::Float(_) | Expr::Read(..) => return Err(EvalError::unsupported(format!("`{e}` as an index"))),
    })
}

fn cond(env: &Env<'_>, e: &Expr) -> EvalResult<bool> {
    let Expr::Binary(op, l, r) = e else {
        return Err(EvalError::unsupported(format!("`{e}` as a condition")));
    };
    if *op == BinOp::And {
        return Ok(cond(env, l)? && cond(env, r)?);
    }
    let l = index(env, l)?;
    let r = index(env, r)?;
    Ok(match op {
        BinOp::Lt => l < r,
        BinOp::Le => l <= r,
        BinOp::Gt => l > r,
        BinOp::Ge => l >= r,
        BinOp::Eq => l == r,
        _ => return Err(EvalError::unsupported(format!("`{e}` as a condition"))),
    })
}

/// The view a call argument denotes: point dimensions fix a coordinate,
/// interval dimensions stay free.
fn window_view(env: &Env<'_>, w: &Window) -> EvalResult<View> {
    let base = env.view(&w.buf)?;
    let out_of_bounds = |what: String| EvalError::OutOfBounds {
        buffer: w.buf.clone(),
        index: what,
    };
    let mut dims = Vec::with_capacity(base.dims.len());
    let mut window = w.dims.iter();
    for d in &base.dims {
        let ViewDim::Free { offset, extent } = *d else {
            dims.push(d.clone());
            continue;
        };
        let wd = window
            .next()
            .ok_or_else(|| out_of_bounds(format!("window with {} dimensions", w.dims.len())))?;
        match wd {
            WindowDim::Point(e) => {
                let p = index(env, e)?;
                if p < 0 || p >= extent {
                    return Err(out_of_bounds(p.to_string()));
                }
                dims.push(ViewDim::Fixed(offset + p));
            }
            WindowDim::Interval(lo, hi) => {
                let lo = index(env, lo)?;
                let hi = index(env, hi)?;
                if lo < 0 || hi > extent || lo > hi {
                    return Err(out_of_bounds(format!("{lo}:{hi}")));
                }
                dims.push(ViewDim::Free {
                    offset: offset + lo,
                    extent: hi - lo,
                });
            }
        }
    }
    if window.next().is_some() {
        return Err(out_of_bounds(format!("window with {} dimensions", w.dims.len())));
    }
    Ok(View {
        tensor: base.tensor,
        name: base.name.clone(),
        dims,
    })
}
