use super::Relu;

#[derive(Debug, Clone)]
pub enum ActFn {
    Relu(Relu),
}

impl ActFn {
    pub fn relu() -> Self {
        Self::Relu(Relu)
    }

    pub fn f(&self, x: f32) -> f32 {
        match self {
            Self::Relu(a) => a.f(x),
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match self {
            Self::Relu(a) => a.df(x),
        }
    }
}
