/// A value as stored into, and read back out of, a weak-value map.
///
/// `Ref` holds a reclaimable handle (`Tracked<T>` or `SyncTracked<T>`); the
/// map keeps only a weak reference to it. `Plain` is owned inline and never
/// reclaimed.
///
/// Equality on `Ref` is the handle's equality, which for tracked handles is
/// identity.
#[derive(Clone, Debug, PartialEq)]
pub enum Value<R, P> {
    Ref(R),
    Plain(P),
}

impl<R, P> Value<R, P> {
    pub fn as_ref(&self) -> Option<&R> {
        match self {
            Value::Ref(r) => Some(r),
            Value::Plain(_) => None,
        }
    }

    pub fn as_plain(&self) -> Option<&P> {
        match self {
            Value::Ref(_) => None,
            Value::Plain(p) => Some(p),
        }
    }

    pub fn into_ref(self) -> Option<R> {
        match self {
            Value::Ref(r) => Some(r),
            Value::Plain(_) => None,
        }
    }

    pub fn into_plain(self) -> Option<P> {
        match self {
            Value::Ref(_) => None,
            Value::Plain(p) => Some(p),
        }
    }
}

impl<R, P> From<R> for Value<R, P> {
    fn from(r: R) -> Self {
        Value::Ref(r)
    }
}
